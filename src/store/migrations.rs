//! Versioned schema. Each script runs once; the applied version lives in
//! SQLite's `user_version`.

use rusqlite_migration::{Migrations, M};

const MIGRATION_SCRIPTS: &[&str] = &[include_str!("migrations/V1__initial_schema.sql")];

pub fn runner() -> Migrations<'static> {
    let steps = MIGRATION_SCRIPTS
        .iter()
        .map(|sql| M::up(*sql))
        .collect::<Vec<_>>();
    Migrations::new(steps)
}

pub fn latest_version() -> i64 {
    MIGRATION_SCRIPTS.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_validate() {
        assert!(runner().validate().is_ok());
    }
}
