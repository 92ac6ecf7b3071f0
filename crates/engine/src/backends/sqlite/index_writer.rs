//! Writes index entries to the `search_index` table.

use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;

use crate::error::EngineResult;
use crate::search::{IndexEntry, IndexValue};

use super::backend::internal_error;

const INSERT_SQL: &str = "INSERT INTO search_index (
        resource_type, resource_id, param_name, param_type, value_kind, path,
        value_string,
        value_token_system, value_token_code, value_token_display,
        value_number,
        value_date_start, value_date_end,
        value_quantity_value, value_quantity_system, value_quantity_code, value_quantity_unit,
        value_quantity_canonical, value_quantity_canonical_code,
        value_reference, value_reference_type, value_reference_id,
        value_uri,
        value_latitude, value_longitude
    ) VALUES (
        ?1, ?2, ?3, ?4, ?5, ?6,
        ?7,
        ?8, ?9, ?10,
        ?11,
        ?12, ?13,
        ?14, ?15, ?16, ?17,
        ?18, ?19,
        ?20, ?21, ?22,
        ?23,
        ?24, ?25
    )";

/// Number of typed value columns following the six key columns.
const VALUE_COLUMNS: usize = 19;

/// Deletes every index entry of a resource.
pub(crate) fn delete_entries(conn: &Connection, resource_type: &str, id: &str) -> EngineResult<usize> {
    conn.execute(
        "DELETE FROM search_index WHERE resource_type = ?1 AND resource_id = ?2",
        [resource_type, id],
    )
    .map_err(|e| internal_error(format!("Failed to delete search index entries: {}", e)))
}

/// Replaces the index entries of a resource.
pub(crate) fn replace_entries(
    conn: &Connection,
    resource_type: &str,
    id: &str,
    entries: &[IndexEntry],
) -> EngineResult<()> {
    delete_entries(conn, resource_type, id)?;

    let mut stmt = conn
        .prepare_cached(INSERT_SQL)
        .map_err(|e| internal_error(format!("Failed to prepare index insert: {}", e)))?;
    for entry in entries {
        let params = row_params(resource_type, id, entry);
        stmt.execute(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| internal_error(format!("Failed to insert search index entry: {}", e)))?;
    }

    tracing::debug!(
        resource_type,
        id,
        "Wrote {} search index entries",
        entries.len()
    );
    Ok(())
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn opt_text(value: &Option<String>) -> SqlValue {
    value.as_deref().map(text).unwrap_or(SqlValue::Null)
}

/// Builds the 25 positional parameters of [`INSERT_SQL`].
fn row_params(resource_type: &str, id: &str, entry: &IndexEntry) -> Vec<SqlValue> {
    let mut params = vec![
        text(resource_type),
        text(id),
        text(&entry.param_name),
        text(&entry.param_type.to_string()),
        text(entry.value.kind()),
        text(&entry.path),
    ];

    let mut values = vec![SqlValue::Null; VALUE_COLUMNS];
    match &entry.value {
        IndexValue::String(s) => values[0] = text(s),
        IndexValue::Token {
            system,
            code,
            display,
        } => {
            values[1] = opt_text(system);
            values[2] = text(code);
            values[3] = opt_text(display);
        }
        IndexValue::Number(n) => values[4] = SqlValue::Real(*n),
        IndexValue::Date(range) | IndexValue::DateTime(range) => {
            values[5] = SqlValue::Integer(range.start);
            values[6] = SqlValue::Integer(range.end);
        }
        IndexValue::Quantity {
            value,
            system,
            code,
            unit,
            canonical,
        } => {
            values[7] = SqlValue::Real(*value);
            values[8] = opt_text(system);
            values[9] = opt_text(code);
            values[10] = opt_text(unit);
            if let Some(canonical) = canonical {
                values[11] = SqlValue::Real(canonical.value);
                values[12] = text(&canonical.code);
            }
        }
        IndexValue::Reference {
            reference,
            resource_type,
            resource_id,
        } => {
            values[13] = text(reference);
            values[14] = opt_text(resource_type);
            values[15] = opt_text(resource_id);
        }
        IndexValue::Uri(uri) => values[16] = text(uri),
        IndexValue::Position {
            latitude,
            longitude,
        } => {
            values[17] = SqlValue::Real(*latitude);
            values[18] = SqlValue::Real(*longitude);
        }
    }

    params.extend(values);
    params
}
