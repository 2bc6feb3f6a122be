//! Schemas, master keys, credentials and external data sources

use super::principals::owner_or_default;
use super::{Statement, Synthesizer};
use crate::error::{ReconcileError, Result};
use crate::model::{
    is_default_owner, owners_match, Credential, CredentialSpec, ExternalDataSource,
    ExternalDataSourceSpec, ExternalDataSourceType, MasterKeySpec, Schema, SchemaSpec,
};
use crate::quote::{quote_ident, quote_nliteral, validate_secret};

impl Synthesizer {
    /// `CREATE SCHEMA`, with `AUTHORIZATION` only for a non-default owner
    pub fn create_schema(&self, desired: &SchemaSpec) -> Result<Vec<Statement>> {
        let mut sql = format!("CREATE SCHEMA {}", quote_ident(&desired.name)?);
        if !is_default_owner(&desired.owner_name) {
            sql.push_str(&format!(" AUTHORIZATION {}", quote_ident(&desired.owner_name)?));
        }
        Ok(vec![Statement::new(sql)])
    }

    pub fn alter_schema(&self, current: &Schema, desired: &SchemaSpec) -> Result<Vec<Statement>> {
        if owners_match(&current.owner_name, &desired.owner_name) {
            return Ok(Vec::new());
        }
        Ok(vec![Statement::new(format!(
            "ALTER AUTHORIZATION ON SCHEMA::{} TO {}",
            quote_ident(&desired.name)?,
            quote_ident(owner_or_default(&desired.owner_name))?
        ))])
    }

    pub fn drop_schema(&self, name: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!("DROP SCHEMA {}", quote_ident(name)?))])
    }

    pub fn create_master_key(&self, desired: &MasterKeySpec) -> Result<Vec<Statement>> {
        validate_secret("master key password", &desired.password)?;
        let sql = format!(
            "CREATE MASTER KEY ENCRYPTION BY PASSWORD = {}",
            quote_nliteral(&desired.password)?
        );
        Ok(vec![Statement::with_secret(sql, &desired.password)?])
    }

    /// Regenerates the key under the new password
    pub fn alter_master_key(&self, desired: &MasterKeySpec) -> Result<Vec<Statement>> {
        validate_secret("master key password", &desired.password)?;
        let sql = format!(
            "ALTER MASTER KEY REGENERATE WITH ENCRYPTION BY PASSWORD = {}",
            quote_nliteral(&desired.password)?
        );
        Ok(vec![Statement::with_secret(sql, &desired.password)?])
    }

    pub fn drop_master_key(&self) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new("DROP MASTER KEY")])
    }

    pub fn create_credential(&self, desired: &CredentialSpec) -> Result<Vec<Statement>> {
        validate_secret("credential secret", &desired.secret)?;
        let sql = format!(
            "CREATE DATABASE SCOPED CREDENTIAL {} WITH IDENTITY = {}, SECRET = {}",
            quote_ident(&desired.name)?,
            quote_nliteral(&desired.identity)?,
            quote_nliteral(&desired.secret)?
        );
        Ok(vec![Statement::with_secret(sql, &desired.secret)?])
    }

    /// An empty desired secret leaves the stored secret untouched.
    pub fn alter_credential(&self, current: &Credential, desired: &CredentialSpec) -> Result<Vec<Statement>> {
        let identity_changed = current.identity != desired.identity;
        if !identity_changed && desired.secret.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = format!(
            "ALTER DATABASE SCOPED CREDENTIAL {} WITH IDENTITY = {}",
            quote_ident(&desired.name)?,
            quote_nliteral(&desired.identity)?
        );
        if desired.secret.is_empty() {
            return Ok(vec![Statement::new(sql)]);
        }
        validate_secret("credential secret", &desired.secret)?;
        sql.push_str(&format!(", SECRET = {}", quote_nliteral(&desired.secret)?));
        Ok(vec![Statement::with_secret(sql, &desired.secret)?])
    }

    pub fn drop_credential(&self, name: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP DATABASE SCOPED CREDENTIAL {}",
            quote_ident(name)?
        ))])
    }

    pub fn create_external_data_source(&self, desired: &ExternalDataSourceSpec) -> Result<Vec<Statement>> {
        let subject = format!("external data source {}", desired.name);
        if desired.location.is_empty() {
            return Err(ReconcileError::validation(subject, "location is required"));
        }

        let mut options = vec![
            format!("TYPE = {}", desired.source_type.keyword()),
            format!("LOCATION = {}", quote_nliteral(&desired.location)?),
        ];
        match desired.source_type {
            ExternalDataSourceType::Rdbms => {
                if !self.caps.supports_elastic_query() {
                    return Err(ReconcileError::validation(
                        subject,
                        "TYPE = RDBMS is only available on the hosted edition",
                    ));
                }
                let database = non_empty(&desired.database_name)
                    .ok_or_else(|| ReconcileError::validation(&subject, "RDBMS sources need a database name"))?;
                let credential = non_empty(&desired.credential_name)
                    .ok_or_else(|| ReconcileError::validation(&subject, "RDBMS sources need a credential"))?;
                options.push(format!("DATABASE_NAME = {}", quote_nliteral(database)?));
                options.push(format!("CREDENTIAL = {}", quote_ident(credential)?));
            }
            ExternalDataSourceType::BlobStorage => {
                if let Some(credential) = non_empty(&desired.credential_name) {
                    options.push(format!("CREDENTIAL = {}", quote_ident(credential)?));
                }
            }
        }

        Ok(vec![Statement::new(format!(
            "CREATE EXTERNAL DATA SOURCE {} WITH ({})",
            quote_ident(&desired.name)?,
            options.join(", ")
        ))])
    }

    /// Location and credential are altered in place; type and remote database
    /// are fixed at creation.
    pub fn alter_external_data_source(
        &self,
        current: &ExternalDataSource,
        desired: &ExternalDataSourceSpec,
    ) -> Result<Vec<Statement>> {
        let subject = format!("external data source {}", desired.name);
        if !current.type_desc.eq_ignore_ascii_case(desired.source_type.keyword()) {
            return Err(ReconcileError::validation(
                subject,
                format!(
                    "type changed from {} to {}; the data source must be replaced",
                    current.type_desc,
                    desired.source_type.keyword()
                ),
            ));
        }
        let desired_database = non_empty(&desired.database_name).unwrap_or("");
        if current.database_name != desired_database {
            return Err(ReconcileError::validation(
                subject,
                "remote database changed; the data source must be replaced",
            ));
        }

        let mut options = Vec::new();
        if current.location != desired.location {
            options.push(format!("LOCATION = {}", quote_nliteral(&desired.location)?));
        }
        let desired_credential = non_empty(&desired.credential_name).unwrap_or("");
        if !desired_credential.is_empty() && !current.credential_name.eq_ignore_ascii_case(desired_credential) {
            options.push(format!("CREDENTIAL = {}", quote_ident(desired_credential)?));
        }
        if options.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Statement::new(format!(
            "ALTER EXTERNAL DATA SOURCE {} SET {}",
            quote_ident(&desired.name)?,
            options.join(", ")
        ))])
    }

    pub fn drop_external_data_source(&self, name: &str) -> Result<Vec<Statement>> {
        Ok(vec![Statement::new(format!(
            "DROP EXTERNAL DATA SOURCE {}",
            quote_ident(name)?
        ))])
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}
