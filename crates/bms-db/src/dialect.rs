use bms_config::DbType;
use std::fmt;

/// SQL dialect served by the asset bundle. Dialects differ only in
/// connection handling, catalog probe text, and timestamp/identity types;
/// all of that lives in the bundle, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mssql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mssql => "mssql",
        }
    }

    /// Rewrite positional `?` placeholders to the dialect-native form.
    /// The bundle is authored with `?` across all dialects; SQLite takes
    /// it as-is, Postgres wants `$N`, SQL Server wants `@pN`.
    ///
    /// Question marks inside single-quoted literals and `--` comments are
    /// left alone.
    pub fn rewrite_placeholders(&self, sql: &str) -> String {
        if matches!(self, Dialect::Sqlite) {
            return sql.to_string();
        }

        let mut out = String::with_capacity(sql.len() + 16);
        let mut n = 0u32;
        let mut in_string = false;
        let mut in_line_comment = false;
        let mut chars = sql.chars().peekable();

        while let Some(c) = chars.next() {
            if in_line_comment {
                if c == '\n' {
                    in_line_comment = false;
                }
                out.push(c);
                continue;
            }
            if in_string {
                // '' is an escaped quote inside a literal.
                if c == '\'' {
                    if chars.peek() == Some(&'\'') {
                        out.push(c);
                        out.push(chars.next().unwrap());
                        continue;
                    }
                    in_string = false;
                }
                out.push(c);
                continue;
            }
            match c {
                '\'' => {
                    in_string = true;
                    out.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    in_line_comment = true;
                    out.push(c);
                }
                '?' => {
                    n += 1;
                    match self {
                        Dialect::Postgres => out.push_str(&format!("${n}")),
                        Dialect::Mssql => out.push_str(&format!("@p{n}")),
                        Dialect::Sqlite => unreachable!(),
                    }
                }
                _ => out.push(c),
            }
        }
        out
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<DbType> for Dialect {
    fn from(t: DbType) -> Self {
        match t {
            DbType::Sqlite => Dialect::Sqlite,
            DbType::Postgres => Dialect::Postgres,
            DbType::Mssql => Dialect::Mssql,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_passthrough() {
        let sql = "SELECT 1 FROM t WHERE a = ? AND b = ?";
        assert_eq!(Dialect::Sqlite.rewrite_placeholders(sql), sql);
    }

    #[test]
    fn postgres_numbers_placeholders() {
        let sql = "INSERT INTO t (a, b, c) VALUES (?, ?, ?)";
        assert_eq!(
            Dialect::Postgres.rewrite_placeholders(sql),
            "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)"
        );
    }

    #[test]
    fn mssql_numbers_placeholders() {
        let sql = "UPDATE t SET a = ? WHERE b = ?";
        assert_eq!(
            Dialect::Mssql.rewrite_placeholders(sql),
            "UPDATE t SET a = @p1 WHERE b = @p2"
        );
    }

    #[test]
    fn literals_and_comments_are_untouched() {
        let sql = "SELECT '?' AS q, a FROM t -- trailing ? here\nWHERE b = ?";
        assert_eq!(
            Dialect::Postgres.rewrite_placeholders(sql),
            "SELECT '?' AS q, a FROM t -- trailing ? here\nWHERE b = $1"
        );
    }

    #[test]
    fn escaped_quote_inside_literal() {
        let sql = "SELECT 'it''s ?' FROM t WHERE a = ?";
        assert_eq!(
            Dialect::Postgres.rewrite_placeholders(sql),
            "SELECT 'it''s ?' FROM t WHERE a = $1"
        );
    }
}
