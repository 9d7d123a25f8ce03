//! Query normalization using the datafusion-sqlparser-rs tokenizer
//!
//! Normalization is textual, not a parse: invalid SQL still normalizes as long as
//! it tokenizes, and anything that fails falls back to the raw text.
//!
//! Only unquoted words are rewritten. Every other token (string literals of any
//! flavour, numbers, operators) is copied from the source text by its span, so
//! escape sequences such as Postgres `E'a\nb'` survive byte for byte.

use querycache_core::{CacheKey, Config, DialectConfig};
use sqlparser::dialect::{BigQueryDialect, Dialect, GenericDialect, PostgreSqlDialect, SnowflakeDialect};
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Span, Token, TokenWithSpan, Tokenizer, Word};
use std::panic::{self, AssertUnwindSafe};

static GENERIC: GenericDialect = GenericDialect {};
static BIGQUERY: BigQueryDialect = BigQueryDialect {};
static POSTGRES: PostgreSqlDialect = PostgreSqlDialect {};
static SNOWFLAKE: SnowflakeDialect = SnowflakeDialect {};

/// Default length above which queries are keyed on their raw text
pub const DEFAULT_MAX_LENGTH: usize = 40_000;

/// Canonicalizes SQL text so formatting differences map to one cache key
#[derive(Debug, Clone)]
pub struct SqlNormalizer {
    dialect: DialectConfig,
    enabled: bool,
    fold_identifiers: bool,
    max_length: usize,
}

impl SqlNormalizer {
    /// Create an enabled normalizer with the generic dialect
    pub fn new() -> Self {
        Self {
            dialect: DialectConfig::Ansi,
            enabled: true,
            fold_identifiers: true,
            max_length: DEFAULT_MAX_LENGTH,
        }
    }

    /// A normalizer that returns its input unchanged
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Create a normalizer from the normalization fields of a config
    pub fn from_config(config: &Config) -> Self {
        Self {
            dialect: config.dialect.clone(),
            enabled: config.normalize,
            fold_identifiers: config.fold_identifiers,
            max_length: config.normalize_max_length,
        }
    }

    pub fn with_dialect(mut self, dialect: DialectConfig) -> Self {
        self.dialect = dialect;
        self
    }

    /// When false only keywords are upper-cased
    pub fn with_fold_identifiers(mut self, fold: bool) -> Self {
        self.fold_identifiers = fold;
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn sql_dialect(&self) -> &'static dyn Dialect {
        match self.dialect {
            DialectConfig::BigQuery => &BIGQUERY,
            DialectConfig::Snowflake => &SNOWFLAKE,
            DialectConfig::Postgres => &POSTGRES,
            DialectConfig::Ansi => &GENERIC,
        }
    }

    /// Canonical text of `raw_sql`
    ///
    /// Never fails: when normalization is disabled or cannot be applied, the raw
    /// text is returned unchanged.
    pub fn normalize(&self, raw_sql: &str) -> String {
        if !self.enabled {
            return raw_sql.to_string();
        }

        match self.try_normalize(raw_sql) {
            Ok(canonical) => canonical,
            Err(e) => {
                tracing::debug!("Using query text as is: {}", e);
                raw_sql.to_string()
            }
        }
    }

    /// Cache key of `raw_sql` (normalize, then hash)
    pub fn key_for(&self, raw_sql: &str) -> CacheKey {
        CacheKey::derive(&self.normalize(raw_sql))
    }

    /// Normalize, reporting why the fallback would be taken
    pub fn try_normalize(&self, raw_sql: &str) -> Result<String, NormalizeError> {
        let length = raw_sql.chars().count();
        if length > self.max_length {
            return Err(NormalizeError::TooLong {
                length,
                max: self.max_length,
            });
        }

        let dialect = self.sql_dialect();

        // The tokenizer is external code; a panic inside it must not fail the query.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let tokens = Tokenizer::new(dialect, raw_sql)
                .with_unescape(false)
                .tokenize_with_location()
                .map_err(|e| NormalizeError::Tokenize(e.to_string()))?;
            self.render(&SourceText::new(raw_sql), &tokens)
        }));

        result.unwrap_or(Err(NormalizeError::Internal))
    }

    fn render(
        &self,
        source: &SourceText<'_>,
        tokens: &[TokenWithSpan],
    ) -> Result<String, NormalizeError> {
        let mut significant: Vec<&TokenWithSpan> = tokens
            .iter()
            // Whitespace tokens include both comment styles
            .filter(|t| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
            .collect();

        while matches!(significant.last().map(|t| &t.token), Some(Token::SemiColon)) {
            significant.pop();
        }

        let mut out = String::with_capacity(source.text.len());
        for token in significant {
            if !out.is_empty() {
                out.push(' ');
            }
            match &token.token {
                Token::Word(word) => out.push_str(&self.render_word(word)),
                _ => out.push_str(source.slice(token.span).ok_or(NormalizeError::Span)?),
            }
        }
        Ok(out)
    }

    fn render_word(&self, word: &Word) -> String {
        match word.quote_style {
            Some(open) => {
                let close = match open {
                    '[' => ']',
                    other => other,
                };
                format!("{}{}{}", open, word.value, close)
            }
            None if self.fold_identifiers || word.keyword != Keyword::NoKeyword => {
                word.value.to_uppercase()
            }
            None => word.value.clone(),
        }
    }
}

/// Maps tokenizer locations (1-based line and character column) back to byte offsets
struct SourceText<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> SourceText<'a> {
    fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { text, line_starts }
    }

    fn offset(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *self.line_starts.get(line)?;
        let rest = &self.text[start..];

        match rest.char_indices().nth(column) {
            Some((i, _)) => Some(start + i),
            None if rest.chars().count() == column => Some(self.text.len()),
            None => None,
        }
    }

    fn slice(&self, span: Span) -> Option<&'a str> {
        let start = self.offset(span.start)?;
        let end = self.offset(span.end)?;
        self.text.get(start..end)
    }
}

impl Default for SqlNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Reasons a query could not be normalized
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("query is too long to normalize ({length} > {max} characters)")]
    TooLong { length: usize, max: usize },

    #[error("tokenizer error: {0}")]
    Tokenize(String),

    #[error("token position outside the query text")]
    Span,

    #[error("tokenizer failed unexpectedly")]
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn normalize(sql: &str) -> String {
        SqlNormalizer::new().normalize(sql)
    }

    #[test]
    fn collapses_whitespace_and_case() {
        assert_eq!(normalize("select * from t"), "SELECT * FROM T");
        assert_eq!(normalize("  SELECT *\nFROM\tT  "), "SELECT * FROM T");
        assert_eq!(normalize("select * from t"), normalize("SELECT *\nFROM T"));
    }

    #[test]
    fn multiline_formatting_is_irrelevant() {
        let compact = "SELECT TIN, COUNT(sig) AS n, SUM(amount) as total FROM Receipts \
                       WHERE d BETWEEN '20180601' AND '20180609' AND kind='N' GROUP BY TIN";
        let pretty = r#"
            SELECT
                TIN,
                COUNT(sig)  AS n,
                SUM(amount) as total
            FROM
                Receipts
            WHERE
                d BETWEEN '20180601' AND '20180609'
            AND
                kind='N'
            GROUP BY
                TIN
        "#;
        assert_eq!(normalize(compact), normalize(pretty));
    }

    #[test]
    fn strips_comments_and_trailing_semicolons() {
        assert_eq!(
            normalize("select top 3 * from receipts -- I have a comment"),
            normalize("SELECT top 3 * FROM receipts")
        );
        assert_eq!(
            normalize("select /* inline */ 1;"),
            "SELECT 1"
        );
        assert_eq!(normalize("select 1;;"), "SELECT 1");
    }

    #[test]
    fn preserves_quoted_content() {
        assert_eq!(
            normalize("select 'Hello  World' from \"MyTable\""),
            "SELECT 'Hello  World' FROM \"MyTable\""
        );
        assert_eq!(
            normalize("select 'it''s'"),
            "SELECT 'it''s'"
        );
        assert_ne!(normalize("select 'a'"), normalize("select 'A'"));
    }

    #[test]
    fn postgres_escape_strings_are_kept_verbatim() {
        let postgres = SqlNormalizer::new().with_dialect(DialectConfig::Postgres);

        let once = postgres.normalize("select E'a\\nb'");
        assert_eq!(once, "SELECT E'a\\nb'");
        assert_eq!(postgres.normalize(&once), once);

        assert_ne!(
            postgres.key_for("select E'tab\\there'"),
            postgres.key_for("select E'tab\there'")
        );
        assert_eq!(
            postgres.normalize("select   E'it\\'s'  from t"),
            "SELECT E'it\\'s' FROM T"
        );
    }

    #[test]
    fn literals_spanning_lines_are_kept_verbatim() {
        let sql = "select 'first\nsecond',\n  'é  ü'\nfrom   t";
        assert_eq!(normalize(sql), "SELECT 'first\nsecond' , 'é  ü' FROM T");
        assert_eq!(normalize(&normalize(sql)), normalize(sql));
    }

    #[test]
    fn identifiers_kept_when_folding_disabled() {
        let normalizer = SqlNormalizer::new().with_fold_identifiers(false);

        assert_eq!(
            normalizer.normalize("select top 3 * from receipts"),
            normalizer.normalize("SELECT top 3 * FROM receipts")
        );
        assert_ne!(
            normalizer.normalize("select top 3 * from receipts"),
            normalizer.normalize("SELECT top 3 * FROM Receipts"),
            "Identifier names should not be normalized"
        );
    }

    #[test]
    fn invalid_sql_still_normalizes() {
        assert_eq!(normalize("SELECT FROM WHERE"), "SELECT FROM WHERE");
        assert_eq!(normalize("select {{ ref('users') }}"), normalize("SELECT {{ ref('users') }}"));
    }

    #[test]
    fn tokenizer_failure_falls_back_to_raw_text() {
        let raw = "select 'unterminated";
        let normalizer = SqlNormalizer::new();

        assert!(matches!(
            normalizer.try_normalize(raw),
            Err(NormalizeError::Tokenize(_))
        ));
        assert_eq!(normalizer.normalize(raw), raw);
    }

    #[test]
    fn long_queries_are_used_as_is() {
        let ids: Vec<String> = (0..40_000).map(|i| i.to_string()).collect();
        let raw = format!("select * from table where id in ({})", ids.join(", "));

        assert_eq!(normalize(&raw), raw);
        assert_eq!(
            SqlNormalizer::new().with_max_length(10).normalize("select      1"),
            "select      1"
        );
    }

    #[test]
    fn disabled_normalizer_is_identity() {
        let normalizer = SqlNormalizer::disabled();
        assert!(!normalizer.is_enabled());
        assert_eq!(normalizer.normalize("select *\nfrom t"), "select *\nfrom t");
        assert_ne!(
            normalizer.key_for("select * from t"),
            normalizer.key_for("SELECT * FROM t")
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("  \n -- only a comment"), "");
    }

    #[test]
    fn from_config_respects_flags() {
        let mut config = Config::default();
        config.normalize = false;
        assert!(!SqlNormalizer::from_config(&config).is_enabled());

        config.normalize = true;
        config.dialect = DialectConfig::Postgres;
        let normalizer = SqlNormalizer::from_config(&config);
        assert_eq!(normalizer.normalize("select $1"), "SELECT $1");
    }

    #[test]
    fn key_for_matches_derive_of_normalized() {
        let normalizer = SqlNormalizer::new();
        let sql = "select a, b from t";
        assert_eq!(
            normalizer.key_for(sql),
            CacheKey::derive(&normalizer.normalize(sql))
        );
        assert_eq!(normalizer.key_for(sql), normalizer.key_for("SELECT a,b\nFROM t"));
    }

    #[test]
    fn dialects_tokenize_quotes() {
        let bigquery = SqlNormalizer::new().with_dialect(DialectConfig::BigQuery);
        assert_eq!(
            bigquery.normalize("select `My Col` from `proj.ds.tbl`"),
            "SELECT `My Col` FROM `proj.ds.tbl`"
        );
    }
}
