//! INSERT/UPDATE/DELETE statement builders.
//!
//! Parameter numbering convention: SET values first, then key columns,
//! then (for the version-checked path) the expected version. Callers bind
//! values in the same order.

use stratum_core::quote_ident;

/// `INSERT INTO "t" ("a", "b") VALUES ($1, $2)`
pub fn build_insert(table: &str, columns: &[&str]) -> String {
    let cols = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        cols,
        placeholders
    )
}

/// `INSERT INTO "t" ("a") VALUES ($1) RETURNING "id"`
///
/// Used when identity columns are database-generated; the returned row
/// carries the generated key values.
pub fn build_insert_returning(table: &str, columns: &[&str], returning: &[&str]) -> String {
    let ret = returning
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{} RETURNING {}", build_insert(table, columns), ret)
}

/// `UPDATE "t" SET "a" = $1 WHERE "id" = $2`
pub fn build_update(table: &str, set_columns: &[&str], key_columns: &[&str]) -> String {
    let set = set_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let predicate = key_predicate(key_columns, set_columns.len());
    format!("UPDATE {} SET {} WHERE {}", quote_ident(table), set, predicate)
}

/// `UPDATE "t" SET "a" = $1 WHERE "id" = $2 AND "version" = $3`
///
/// Zero affected rows on this statement means a concurrent writer won;
/// the caller reports a stale-data conflict.
pub fn build_update_versioned(
    table: &str,
    set_columns: &[&str],
    key_columns: &[&str],
    version_column: &str,
) -> String {
    let base = build_update(table, set_columns, key_columns);
    let n = set_columns.len() + key_columns.len() + 1;
    format!("{} AND {} = ${}", base, quote_ident(version_column), n)
}

/// `DELETE FROM "t" WHERE "id" = $1`
pub fn build_delete(table: &str, key_columns: &[&str]) -> String {
    format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        key_predicate(key_columns, 0)
    )
}

fn key_predicate(key_columns: &[&str], offset: usize) -> String {
    key_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", quote_ident(c), offset + i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert() {
        assert_eq!(
            build_insert("users", &["id", "name"]),
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn insert_returning() {
        assert_eq!(
            build_insert_returning("users", &["name"], &["id"]),
            "INSERT INTO \"users\" (\"name\") VALUES ($1) RETURNING \"id\""
        );
    }

    #[test]
    fn update_numbers_keys_after_set() {
        assert_eq!(
            build_update("users", &["name", "age"], &["id"]),
            "UPDATE \"users\" SET \"name\" = $1, \"age\" = $2 WHERE \"id\" = $3"
        );
    }

    #[test]
    fn update_composite_key() {
        assert_eq!(
            build_update("orders", &["total"], &["region", "seq"]),
            "UPDATE \"orders\" SET \"total\" = $1 WHERE \"region\" = $2 AND \"seq\" = $3"
        );
    }

    #[test]
    fn versioned_update_appends_check() {
        assert_eq!(
            build_update_versioned("users", &["name"], &["id"], "version"),
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" = $2 AND \"version\" = $3"
        );
    }

    #[test]
    fn delete() {
        assert_eq!(
            build_delete("users", &["id"]),
            "DELETE FROM \"users\" WHERE \"id\" = $1"
        );
    }
}
