// Pre-flight checks. Every check is fatal and short-circuits the run; nothing
// here mutates state except the external structure checker's own artifact.

use std::fs;

use crate::adapter::{version_at_least, SourceDb, TargetDb};
use crate::config::DiffConfig;
use crate::logger;
use crate::meta::MetaStore;
use crate::{Result, CHECK_MODE, DIFF_MODE, REVERSE_MODE};

// Flashback-driven chunking needs 11g.
pub const ORACLE_MIN_VERSION: &str = "11.2";
// Per-table collation metadata exists from 12.2 on.
pub const ORACLE_TABLE_COLLATION_MIN_VERSION: &str = "12.2";

const SUPPORTED_CHARACTER_SETS: &[&str] = &["AL32UTF8", "UTF8", "ZHS16GBK"];
const SUPPORTED_COLLATIONS: &[&str] = &["BINARY", "BINARY_CI", "BINARY_AI"];

// External schema-structure checker. The gate runs it and then inspects the
// check_<schema>.sql artifact it leaves in the working directory.
pub trait StructChecker: Send + Sync {
    fn run(&self, schema: &str) -> Result<()>;
}

pub struct PreGate<'a> {
    cfg: &'a DiffConfig,
    source: &'a dyn SourceDb,
    target: &'a dyn TargetDb,
    meta: &'a MetaStore,
    checker: &'a dyn StructChecker,
}

impl<'a> PreGate<'a> {
    pub fn new(
        cfg: &'a DiffConfig,
        source: &'a dyn SourceDb,
        target: &'a dyn TargetDb,
        meta: &'a MetaStore,
        checker: &'a dyn StructChecker,
    ) -> Self {
        Self {
            cfg,
            source,
            target,
            meta,
            checker,
        }
    }

    // Runs all checks in order against the work-set tables.
    pub fn run(&self, schema: &str, tables: &[String]) -> Result<()> {
        let version = self.check_version()?;
        self.check_character_set()?;
        self.check_collations(schema, &version)?;
        self.check_prior_errors(schema)?;
        self.check_tables_exist(tables)?;
        if !self.cfg.ignore_struct_check {
            self.check_struct(schema)?;
        }
        logger::debug(&format!("pre check schema [{}] finished", schema));
        Ok(())
    }

    fn check_version(&self) -> Result<String> {
        let version = self.source.db_version()?;
        if !version_at_least(&version, ORACLE_MIN_VERSION) {
            return Err(format!(
                "oracle db version [{}] is less than minimum supported [{}]",
                version, ORACLE_MIN_VERSION
            )
            .into());
        }
        Ok(version)
    }

    fn check_character_set(&self) -> Result<()> {
        let charset = self.source.character_set()?;
        // USERENV('LANGUAGE') reads like AMERICAN_AMERICA.AL32UTF8.
        let name = charset.rsplit('.').next().unwrap_or(&charset);
        if !SUPPORTED_CHARACTER_SETS.contains(&name) {
            return Err(format!("oracle db character set [{}] isn't supported", charset).into());
        }
        Ok(())
    }

    fn check_collations(&self, schema: &str, version: &str) -> Result<()> {
        let nls_sort = self.source.nls_sort()?.to_uppercase();
        let nls_comp = self.source.nls_comp()?.to_uppercase();
        if !SUPPORTED_COLLATIONS.contains(&nls_sort.as_str()) {
            return Err(format!("oracle db nls sort [{}] isn't supported", nls_sort).into());
        }
        if !SUPPORTED_COLLATIONS.contains(&nls_comp.as_str()) {
            return Err(format!("oracle db nls comp [{}] isn't supported", nls_comp).into());
        }
        if nls_sort != nls_comp {
            return Err(format!(
                "oracle db nls_sort [{}] and nls_comp [{}] must be equal, the downstream cannot model divergent collations",
                nls_sort, nls_comp
            )
            .into());
        }
        // From 12.2 tables can override the schema collation; reject any table
        // whose own collation the downstream cannot model.
        if version_at_least(version, ORACLE_TABLE_COLLATION_MIN_VERSION) {
            let schema_collation = self.source.schema_collation(schema)?;
            logger::debug(&format!(
                "oracle schema [{}] collation [{}]",
                schema, schema_collation
            ));
            let map = self.source.table_collations(schema)?;
            let mut unsupported: Vec<String> = map
                .into_iter()
                .filter(|(_, coll)| {
                    !coll.is_empty() && !SUPPORTED_COLLATIONS.contains(&coll.to_uppercase().as_str())
                })
                .map(|(table, coll)| format!("{} [{}]", table, coll))
                .collect();
            if !unsupported.is_empty() {
                unsupported.sort();
                return Err(format!(
                    "oracle tables with unsupported collation: {}",
                    unsupported.join(", ")
                )
                .into());
            }
        }
        Ok(())
    }

    fn check_prior_errors(&self, schema: &str) -> Result<()> {
        let failed = self.meta.count_errors(schema, DIFF_MODE)?;
        if failed > 0 {
            return Err(format!(
                "schema [{}] mode [{}] has {} failed records in [table_error_detail], please clear the log and rerun",
                schema, DIFF_MODE, failed
            )
            .into());
        }
        Ok(())
    }

    fn check_tables_exist(&self, tables: &[String]) -> Result<()> {
        let mut missing = Vec::new();
        for table in tables {
            if !self.target.table_exists(&self.cfg.target_schema.to_uppercase(), table)? {
                missing.push(table.clone());
            }
        }
        if !missing.is_empty() {
            return Err(format!(
                "tables [{}] don't exist in the target db",
                missing.join(", ")
            )
            .into());
        }
        Ok(())
    }

    fn check_struct(&self, schema: &str) -> Result<()> {
        self.checker.run(schema)?;
        let check_failed = self.meta.count_errors_by_source(schema, CHECK_MODE, CHECK_MODE)?;
        let reverse_failed = self
            .meta
            .count_errors_by_source(schema, CHECK_MODE, REVERSE_MODE)?;
        if check_failed > 0 || reverse_failed > 0 {
            return Err(format!(
                "schema [{}] mode [{}] struct check recorded failures, detail see [table_error_detail]",
                schema, CHECK_MODE
            )
            .into());
        }
        let check_file = self.cfg.check_file_path();
        let delta = fs::read_to_string(&check_file).map_err(|e| {
            format!(
                "struct check artifact [{}] isn't readable: {}",
                check_file.display(),
                e
            )
        })?;
        if !delta.is_empty() {
            return Err(format!(
                "oracle and mysql table structs aren't equal, please check fixed file [{}]",
                check_file.display()
            )
            .into());
        }
        Ok(())
    }
}
