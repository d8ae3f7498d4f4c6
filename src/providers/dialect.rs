//! Relational dialects
//!
//! PostgreSQL and MySQL share one query shape. They differ in connection
//! strings, placeholders, identifier quoting and cast spellings, which live
//! here.

use crate::domain::SourceType;
use crate::errors::{Result, SourceplaneError};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlDialect {
    Postgres,
    MySql,
}

impl SqlDialect {
    pub fn for_source_type(source_type: SourceType) -> Option<Self> {
        match source_type {
            SourceType::Postgres => Some(Self::Postgres),
            SourceType::MySql => Some(Self::MySql),
            SourceType::HttpApi => None,
        }
    }

    pub fn source_type(&self) -> SourceType {
        match self {
            Self::Postgres => SourceType::Postgres,
            Self::MySql => SourceType::MySql,
        }
    }

    fn schemes(&self) -> &'static [&'static str] {
        match self {
            Self::Postgres => &["postgres", "postgresql"],
            Self::MySql => &["mysql", "mariadb"],
        }
    }

    fn driver_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySql => 3306,
        }
    }

    /// Bind placeholder for the `index`-th parameter (1-based)
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::MySql => "?".to_string(),
        }
    }

    pub fn quote_ident(&self, ident: &str) -> String {
        match self {
            Self::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
        }
    }

    /// Render a column as text (timestamps are returned as strings)
    pub fn text_cast(&self, expr: &str) -> String {
        match self {
            Self::Postgres => format!("CAST({} AS TEXT)", expr),
            Self::MySql => format!("CAST({} AS CHAR)", expr),
        }
    }

    /// Render a numeric column as a double
    pub fn float_cast(&self, expr: &str) -> String {
        match self {
            Self::Postgres => format!("CAST({} AS DOUBLE PRECISION)", expr),
            Self::MySql => format!("CAST({} AS DOUBLE)", expr),
        }
    }

    /// Compare against a text parameter holding a timestamp
    pub fn timestamp_param(&self, placeholder: &str) -> String {
        match self {
            Self::Postgres => format!("CAST({} AS TIMESTAMP)", placeholder),
            Self::MySql => format!("CAST({} AS DATETIME)", placeholder),
        }
    }

    /// Turn a stored connection secret into a driver URL.
    ///
    /// Accepts a URL whose scheme belongs to this dialect, or a semicolon
    /// separated key/value string (`Host=..;Database=..;Username=..;Password=..`).
    pub fn connection_url(&self, secret: &str) -> Result<String> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(SourceplaneError::config("Connection string is empty"));
        }

        if let Some((scheme, rest)) = secret.split_once("://") {
            let scheme = scheme.to_ascii_lowercase();
            if !self.schemes().contains(&scheme.as_str()) {
                return Err(SourceplaneError::config(format!(
                    "Connection URL scheme '{}' does not match source type '{}'",
                    scheme,
                    self.source_type()
                )));
            }
            return Ok(format!("{}://{}", self.driver_scheme(), rest));
        }

        self.key_value_to_url(secret)
    }

    fn key_value_to_url(&self, secret: &str) -> Result<String> {
        let mut host = None;
        let mut port = None;
        let mut database = None;
        let mut username = None;
        let mut password = None;

        for part in secret.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = part.split_once('=') else {
                return Err(SourceplaneError::config(
                    "Connection string must be a URL or 'Key=Value;' pairs",
                ));
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "host" | "server" | "data source" | "address" => host = Some(value),
                "port" => port = Some(value),
                "database" | "initial catalog" | "dbname" => database = Some(value),
                "username" | "user id" | "user" | "uid" => username = Some(value),
                "password" | "pwd" => password = Some(value),
                // Driver tuning options are not carried over
                _ => {}
            }
        }

        let host = host.filter(|h| !h.is_empty()).ok_or_else(|| {
            SourceplaneError::config("Connection string is missing Host/Server")
        })?;

        // "Server=db,1433" / "Server=db:5432" carry the port inline
        let (host, inline_port) = match host.rsplit_once([',', ':']) {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (h.to_string(), Some(p.to_string()))
            }
            _ => (host, None),
        };

        let port = match port.or(inline_port) {
            Some(p) => p.parse::<u16>().map_err(|_| {
                SourceplaneError::config("Connection string has an invalid port")
            })?,
            None => self.default_port(),
        };

        let mut url = Url::parse(&format!("{}://placeholder", self.driver_scheme()))
            .map_err(|e| SourceplaneError::internal(format!("Failed to build driver URL: {}", e)))?;
        url.set_host(Some(&host))
            .map_err(|_| SourceplaneError::config("Connection string has an invalid host"))?;
        let invalid = |_| SourceplaneError::config("Connection string cannot be expressed as a URL");
        url.set_port(Some(port)).map_err(invalid)?;
        if let Some(username) = username.filter(|u| !u.is_empty()) {
            url.set_username(&username).map_err(invalid)?;
        }
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            url.set_password(Some(&password)).map_err(invalid)?;
        }
        if let Some(database) = database.filter(|d| !d.is_empty()) {
            url.set_path(&database);
        }

        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_and_quoting() {
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
        assert_eq!(SqlDialect::MySql.placeholder(3), "?");
        assert_eq!(SqlDialect::Postgres.quote_ident("line\"id"), "\"line\"\"id\"");
        assert_eq!(SqlDialect::MySql.quote_ident("status"), "`status`");
        assert_eq!(
            SqlDialect::MySql.timestamp_param("?"),
            "CAST(? AS DATETIME)"
        );
    }

    #[test]
    fn test_url_scheme_must_match() {
        assert_eq!(
            SqlDialect::Postgres.connection_url("postgresql://u:p@db/plant").unwrap(),
            "postgres://u:p@db/plant"
        );
        assert_eq!(
            SqlDialect::MySql.connection_url("mariadb://u:p@db:3307/plant").unwrap(),
            "mysql://u:p@db:3307/plant"
        );

        let err = SqlDialect::MySql.connection_url("postgres://u:p@db/plant").unwrap_err();
        assert!(err.is_configuration_error());
        assert!(!err.to_string().contains("u:p"));
    }

    #[test]
    fn test_key_value_connection_string() {
        let url = SqlDialect::Postgres
            .connection_url("Host=db.internal;Port=6543;Database=plant;Username=svc;Password=p@ss;word")
            .unwrap_err();
        // A bare ';' inside the password splits the pair list
        assert!(url.is_configuration_error());

        let url = SqlDialect::Postgres
            .connection_url("Host=db.internal;Port=6543;Database=plant;Username=svc;Password=p@ss w0rd")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), "postgres");
        assert_eq!(parsed.host_str(), Some("db.internal"));
        assert_eq!(parsed.port(), Some(6543));
        assert_eq!(parsed.path(), "/plant");
        assert_eq!(parsed.username(), "svc");
        assert_eq!(parsed.password(), Some("p%40ss%20w0rd"));
    }

    #[test]
    fn test_key_value_aliases_and_default_port() {
        let url = SqlDialect::MySql
            .connection_url("Server=mes-db,3310;Initial Catalog=mes;User Id=reader;Pwd=x1;Pooling=true")
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.host_str(), Some("mes-db"));
        assert_eq!(parsed.port(), Some(3310));
        assert_eq!(parsed.path(), "/mes");
        assert_eq!(parsed.username(), "reader");

        let url = SqlDialect::MySql.connection_url("Server=mes-db;Database=mes").unwrap();
        assert_eq!(Url::parse(&url).unwrap().port(), Some(3306));
    }

    #[test]
    fn test_missing_host_is_configuration_error() {
        assert!(SqlDialect::Postgres.connection_url("Database=x").unwrap_err().is_configuration_error());
        assert!(SqlDialect::Postgres.connection_url("   ").unwrap_err().is_configuration_error());
        assert!(SqlDialect::Postgres.connection_url("garbage").unwrap_err().is_configuration_error());
    }
}
