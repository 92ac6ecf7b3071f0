//! SearchProvider implementation for SQLite.
//!
//! Matching, sorting and paging run as one SQL statement built by
//! [`QueryBuilder`]. `_include` and `_revinclude` are resolved afterwards
//! from the reference entries in `search_index`, in batches of at most
//! `max_include_batch` ids. The whole search reads from one transaction so
//! a concurrent write is seen entirely or not at all.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, Row, params_from_iter};

use crate::core::SearchProvider;
use crate::error::{EngineResult, SearchError};
use crate::search::SearchParameterRegistry;
use crate::types::{IncludeDirective, SearchParamType, SearchQuery, SearchResult, StoredResource};

use super::SqliteBackend;
use super::backend::internal_error;
use super::search::query_builder::{QueryBuilder, RESOURCE_COLUMNS, SqlFragment, SqlParam};
use super::storage::resource_from_row;

type ResourceRow = (String, String, Option<String>, Option<String>, String, Vec<u8>);

/// Reads the [`RESOURCE_COLUMNS`] starting at `offset`.
fn read_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<ResourceRow> {
    Ok((
        row.get(offset)?,
        row.get(offset + 1)?,
        row.get(offset + 2)?,
        row.get(offset + 3)?,
        row.get(offset + 4)?,
        row.get(offset + 5)?,
    ))
}

fn into_resource(row: ResourceRow) -> EngineResult<StoredResource> {
    let (resource_type, id, version_id, last_updated, local_last_updated, data) = row;
    resource_from_row(&resource_type, &id, version_id, last_updated, &local_last_updated, &data)
}

/// Runs a select of [`RESOURCE_COLUMNS`].
fn query_resources(conn: &Connection, fragment: &SqlFragment) -> EngineResult<Vec<StoredResource>> {
    let mut stmt = conn
        .prepare(&fragment.sql)
        .map_err(|e| internal_error(format!("Failed to prepare search query: {}", e)))?;
    let rows = stmt
        .query_map(params_from_iter(fragment.sql_values()), |row| read_row(row, 0))
        .map_err(|e| internal_error(format!("Failed to execute search query: {}", e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| internal_error(format!("Failed to read search row: {}", e)))?;
    rows.into_iter().map(into_resource).collect()
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Checks every include names a reference parameter of its source type.
fn validate_includes(registry: &SearchParameterRegistry, query: &SearchQuery) -> Result<(), SearchError> {
    for include in &query.includes {
        let def = registry
            .get_param(&include.source_type, &include.search_param)
            .ok_or_else(|| SearchError::UnknownParameter {
                resource_type: include.source_type.clone(),
                name: include.search_param.clone(),
            })?;
        if def.param_type != SearchParamType::Reference {
            return Err(SearchError::InvalidValue {
                name: "_include".to_string(),
                value: format!("{}:{}", include.source_type, include.search_param),
                message: format!("'{}' is not a reference parameter", include.search_param),
            });
        }
    }
    Ok(())
}

impl SqliteBackend {
    /// Fetches resources by id, in batches.
    fn load_by_ids(
        &self,
        conn: &Connection,
        resource_type: &str,
        ids: &[String],
    ) -> EngineResult<Vec<StoredResource>> {
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.include_batch()) {
            let mut params = vec![SqlParam::string(resource_type)];
            params.extend(chunk.iter().map(SqlParam::string));
            let fragment = SqlFragment::with_params(
                format!(
                    "SELECT {} FROM resources r WHERE r.resource_type = ? AND r.id IN ({}) ORDER BY r.id",
                    RESOURCE_COLUMNS,
                    placeholders(chunk.len())
                ),
                params,
            );
            found.extend(query_resources(conn, &fragment)?);
        }
        Ok(found)
    }

    fn include_batch(&self) -> usize {
        self.search_config().max_include_batch.max(1)
    }

    /// Resolves one `_include`, filling `included` on each result.
    fn resolve_include(
        &self,
        conn: &Connection,
        include: &IncludeDirective,
        results: &mut [SearchResult],
    ) -> EngineResult<()> {
        let ids: Vec<String> = results
            .iter()
            .filter(|r| r.resource.resource_type() == include.source_type)
            .map(|r| r.resource.id().to_string())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        // source id -> referenced (type, id)
        let mut links: HashMap<String, Vec<(String, String)>> = HashMap::new();
        for chunk in ids.chunks(self.include_batch()) {
            let mut sql = format!(
                "SELECT resource_id, value_reference_type, value_reference_id FROM search_index
                 WHERE resource_type = ? AND param_name = ? AND resource_id IN ({})
                 AND value_reference_type IS NOT NULL AND value_reference_id IS NOT NULL",
                placeholders(chunk.len())
            );
            let mut params = vec![
                SqlParam::string(&include.source_type),
                SqlParam::string(&include.search_param),
            ];
            params.extend(chunk.iter().map(SqlParam::string));
            if let Some(target) = &include.target_type {
                sql.push_str(" AND value_reference_type = ?");
                params.push(SqlParam::string(target));
            }
            let fragment = SqlFragment::with_params(sql, params);

            let mut stmt = conn
                .prepare(&fragment.sql)
                .map_err(|e| internal_error(format!("Failed to prepare include query: {}", e)))?;
            let rows = stmt
                .query_map(params_from_iter(fragment.sql_values()), |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(|e| internal_error(format!("Failed to execute include query: {}", e)))?;
            for row in rows {
                let (source, target_type, target_id) =
                    row.map_err(|e| internal_error(format!("Failed to read include row: {}", e)))?;
                links.entry(source).or_default().push((target_type, target_id));
            }
        }

        let mut wanted: HashMap<String, HashSet<String>> = HashMap::new();
        for (target_type, target_id) in links.values().flatten() {
            wanted
                .entry(target_type.clone())
                .or_default()
                .insert(target_id.clone());
        }
        let mut targets: HashMap<(String, String), StoredResource> = HashMap::new();
        for (target_type, target_ids) in wanted {
            let mut target_ids: Vec<String> = target_ids.into_iter().collect();
            target_ids.sort();
            for resource in self.load_by_ids(conn, &target_type, &target_ids)? {
                targets.insert(
                    (resource.resource_type().to_string(), resource.id().to_string()),
                    resource,
                );
            }
        }

        for result in results.iter_mut() {
            let Some(refs) = links.get(result.resource.id()) else {
                continue;
            };
            if result.resource.resource_type() != include.source_type {
                continue;
            }
            let included = result.included.entry(include.search_param.clone()).or_default();
            for key in refs {
                if let Some(target) = targets.get(key) {
                    if !included.contains(target) {
                        included.push(target.clone());
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolves one `_revinclude`, filling `rev_included` on each result.
    fn resolve_revinclude(
        &self,
        conn: &Connection,
        revinclude: &IncludeDirective,
        resource_type: &str,
        results: &mut [SearchResult],
    ) -> EngineResult<()> {
        let ids: Vec<String> = results.iter().map(|r| r.resource.id().to_string()).collect();
        let mut referencing: HashMap<String, Vec<StoredResource>> = HashMap::new();

        for chunk in ids.chunks(self.include_batch()) {
            let mut params = vec![
                SqlParam::string(&revinclude.source_type),
                SqlParam::string(&revinclude.search_param),
                SqlParam::string(resource_type),
            ];
            params.extend(chunk.iter().map(SqlParam::string));
            params.push(SqlParam::string(&revinclude.source_type));
            let fragment = SqlFragment::with_params(
                format!(
                    "SELECT s.target_id, {} FROM resources r
                     JOIN (SELECT DISTINCT resource_id, value_reference_id AS target_id
                           FROM search_index
                           WHERE resource_type = ? AND param_name = ?
                           AND value_reference_type = ? AND value_reference_id IN ({})) s
                     ON s.resource_id = r.id
                     WHERE r.resource_type = ?
                     ORDER BY r.id",
                    RESOURCE_COLUMNS,
                    placeholders(chunk.len())
                ),
                params,
            );

            let mut stmt = conn
                .prepare(&fragment.sql)
                .map_err(|e| internal_error(format!("Failed to prepare revinclude query: {}", e)))?;
            let rows = stmt
                .query_map(params_from_iter(fragment.sql_values()), |row| {
                    Ok((row.get::<_, String>(0)?, read_row(row, 1)?))
                })
                .map_err(|e| internal_error(format!("Failed to execute revinclude query: {}", e)))?;
            for row in rows {
                let (target_id, row) =
                    row.map_err(|e| internal_error(format!("Failed to read revinclude row: {}", e)))?;
                referencing.entry(target_id).or_default().push(into_resource(row)?);
            }
        }

        let key = (revinclude.source_type.clone(), revinclude.search_param.clone());
        for result in results.iter_mut() {
            let found = referencing.remove(result.resource.id()).unwrap_or_default();
            result.rev_included.entry(key.clone()).or_default().extend(found);
        }
        Ok(())
    }
}

#[async_trait]
impl SearchProvider for SqliteBackend {
    async fn search(&self, query: &SearchQuery) -> EngineResult<Vec<SearchResult>> {
        let select = {
            let registry = self.extractor().registry();
            validate_includes(&registry, query)?;
            QueryBuilder::new(&registry, self.search_config(), Utc::now()).build_select(query)?
        };

        let mut conn = self.get_connection()?;
        let tx = conn.transaction()?;

        let mut results: Vec<SearchResult> = query_resources(&tx, &select)?
            .into_iter()
            .map(SearchResult::new)
            .collect();

        if !results.is_empty() {
            for include in query.forward_includes() {
                self.resolve_include(&tx, include, &mut results)?;
            }
            for revinclude in query.reverse_includes() {
                self.resolve_revinclude(&tx, revinclude, &query.resource_type, &mut results)?;
            }
        }

        tx.commit()?;
        tracing::debug!(
            resource_type = %query.resource_type,
            "Search returned {} result(s)",
            results.len()
        );
        Ok(results)
    }

    async fn count(&self, query: &SearchQuery) -> EngineResult<u64> {
        let fragment = {
            let registry = self.extractor().registry();
            QueryBuilder::new(&registry, self.search_config(), Utc::now()).build_count(query)?
        };

        let conn = self.get_connection()?;
        let count: i64 = conn
            .query_row(&fragment.sql, params_from_iter(fragment.sql_values()), |row| row.get(0))
            .map_err(|e| internal_error(format!("Failed to count search results: {}", e)))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ResourceStorage;
    use crate::types::{SearchParameter, SearchPrefix, SearchValue, SortDirective};
    use serde_json::json;

    async fn seeded() -> SqliteBackend {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .create(vec![
                json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Smith"}], "birthDate": "1980-05-01"}),
                json!({"resourceType": "Patient", "id": "p2", "name": [{"family": "Smythe"}], "birthDate": "1990"}),
                json!({"resourceType": "Observation", "id": "o1", "status": "final", "subject": {"reference": "Patient/p1"}}),
                json!({"resourceType": "Observation", "id": "o2", "status": "final", "subject": {"reference": "Patient/p1"}}),
            ])
            .await
            .unwrap();
        backend
    }

    fn ids(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.resource.id()).collect()
    }

    #[tokio::test]
    async fn test_search_by_string() {
        let backend = seeded().await;
        let query = SearchQuery::new("Patient").with_parameter(SearchParameter::single(
            "family",
            SearchValue::new(SearchPrefix::Eq, "Sm"),
        ));
        let results = backend.search(&query).await.unwrap();
        assert_eq!(ids(&results), vec!["p1", "p2"]);
        assert_eq!(backend.count(&query.with_count(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_sort_descending_by_date() {
        let backend = seeded().await;
        let query = SearchQuery::new("Patient").with_sort(SortDirective::parse("-birthdate"));
        let results = backend.search(&query).await.unwrap();
        assert_eq!(ids(&results), vec!["p2", "p1"]);
    }

    #[tokio::test]
    async fn test_forward_and_reverse_include() {
        let backend = seeded().await;

        let query = SearchQuery::new("Observation")
            .with_include(IncludeDirective::include("Observation", "subject"));
        let results = backend.search(&query).await.unwrap();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.included_by("subject")[0].id(), "p1");
        }

        let query = SearchQuery::new("Patient")
            .with_include(IncludeDirective::revinclude("Observation", "subject"));
        let results = backend.search(&query).await.unwrap();
        let p1 = results.iter().find(|r| r.resource.id() == "p1").unwrap();
        assert_eq!(p1.rev_included_by("Observation", "subject").len(), 2);
        let p2 = results.iter().find(|r| r.resource.id() == "p2").unwrap();
        assert!(p2.rev_included_by("Observation", "subject").is_empty());
    }

    #[tokio::test]
    async fn test_include_must_be_reference() {
        let backend = seeded().await;
        let query = SearchQuery::new("Observation")
            .with_include(IncludeDirective::include("Observation", "status"));
        assert!(backend.search(&query).await.is_err());
    }

    #[tokio::test]
    async fn test_include_batches_small() {
        let mut config = crate::config::EngineConfig::default();
        config.search.max_include_batch = 1;
        let backend =
            SqliteBackend::new(&config, std::sync::Arc::new(crate::search::R4Adapter::new())).unwrap();
        backend
            .create(vec![
                json!({"resourceType": "Patient", "id": "a"}),
                json!({"resourceType": "Patient", "id": "b"}),
                json!({"resourceType": "Observation", "id": "x", "subject": {"reference": "Patient/a"}}),
                json!({"resourceType": "Observation", "id": "y", "subject": {"reference": "Patient/b"}}),
            ])
            .await
            .unwrap();

        let query = SearchQuery::new("Patient")
            .with_include(IncludeDirective::revinclude("Observation", "subject"));
        let results = backend.search(&query).await.unwrap();
        for result in &results {
            assert_eq!(result.rev_included_by("Observation", "subject").len(), 1);
        }
    }
}
