use anyhow::{Context, Result};
use neo4rs::{Graph, Query};
use tracing::info;

use crate::model::{Entity, KnowledgeGraph, Relationship};

/// Publishes a resolved knowledge graph to Neo4j.
///
/// Nodes are merged by entity id and edges by (source, target, type), so
/// exporting the same analysis twice is idempotent.
pub struct GraphExporter {
    graph: Graph,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ExportStats {
    pub entities: usize,
    pub relationships: usize,
}

impl GraphExporter {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let graph = Graph::new(uri, user, password)
            .await
            .context("Failed to connect to Neo4j")?;
        Ok(Self::new(graph))
    }

    pub async fn init_schema(&self) -> Result<()> {
        let query = Query::new(
            "CREATE INDEX apor_entity_id_index IF NOT EXISTS FOR (e:AporEntity) ON (e.id)"
                .to_string(),
        );
        self.graph
            .run(query)
            .await
            .context("Failed to create index on AporEntity.id")?;

        let query = Query::new(
            "CREATE INDEX apor_entity_analysis_index IF NOT EXISTS FOR (e:AporEntity) ON (e.analysis_id)"
                .to_string(),
        );
        self.graph
            .run(query)
            .await
            .context("Failed to create index on AporEntity.analysis_id")?;

        Ok(())
    }

    async fn export_entity(&self, entity: &Entity) -> Result<()> {
        let query = Query::new(
            r#"
            MERGE (e:AporEntity {id: $id})
            SET e.analysis_id = $analysis_id,
                e.type = $type,
                e.label = $label,
                e.aliases = $aliases,
                e.confidence = $confidence,
                e.impact_score = $impact_score
            "#
            .to_string(),
        )
        .param("id", entity.id.to_string())
        .param("analysis_id", entity.analysis_id.to_string())
        .param("type", entity.entity_type.as_str().to_string())
        .param("label", entity.label.clone())
        .param("aliases", entity.aliases.iter().cloned().collect::<Vec<String>>())
        .param("confidence", i64::from(entity.confidence))
        .param("impact_score", i64::from(entity.impact_score));

        self.graph
            .run(query)
            .await
            .with_context(|| format!("Failed to export entity {}", entity.id))
    }

    async fn export_relationship(&self, relationship: &Relationship) -> Result<()> {
        let query = Query::new(
            r#"
            MATCH (source:AporEntity {id: $source_id})
            MATCH (target:AporEntity {id: $target_id})
            MERGE (source)-[r:RELATES_TO {type: $relationship_type}]->(target)
            SET r.id = $id,
                r.confidence = $confidence
            "#
            .to_string(),
        )
        .param("id", relationship.id.to_string())
        .param("source_id", relationship.source_entity_id.to_string())
        .param("target_id", relationship.target_entity_id.to_string())
        .param("relationship_type", relationship.relationship_type.clone())
        .param("confidence", i64::from(relationship.confidence));

        self.graph
            .run(query)
            .await
            .with_context(|| format!("Failed to export relationship {}", relationship.id))
    }

    pub async fn export(&self, graph: &KnowledgeGraph) -> Result<ExportStats> {
        for entity in &graph.entities {
            self.export_entity(entity).await?;
        }
        for relationship in &graph.relationships {
            self.export_relationship(relationship).await?;
        }

        let stats = ExportStats {
            entities: graph.entities.len(),
            relationships: graph.relationships.len(),
        };
        info!(
            analysis_id = %graph.analysis_id,
            entities = stats.entities,
            relationships = stats.relationships,
            "Exported graph to Neo4j"
        );
        Ok(stats)
    }
}
