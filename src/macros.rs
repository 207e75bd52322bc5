// src/macros.rs

//! Shared macros for the crate.

/// Declare a closed enum that is stored as text in the database.
///
/// Generates `as_str`, `ALL`, `FromStr`, `Display`, serde with the given
/// wire names, and rusqlite `ToSql`/`FromSql`.
///
/// ```ignore
/// db_enum! {
///     /// Release state
///     pub enum ReleaseState {
///         Disabled => "disabled",
///         Current => "current",
///     }
/// }
/// ```
macro_rules! db_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, ::serde::Serialize, ::serde::Deserialize,
        )]
        $vis enum $name {
            $( $(#[$vmeta])* #[serde(rename = $value)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $value ),+
                }
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $( $value => Ok($name::$variant), )+
                    _ => Err(format!("Invalid {}: {}", stringify!($name), s)),
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> ::rusqlite::Result<::rusqlite::types::ToSqlOutput<'_>> {
                Ok(::rusqlite::types::ToSqlOutput::from(self.as_str()))
            }
        }

        impl ::rusqlite::types::FromSql for $name {
            fn column_result(
                value: ::rusqlite::types::ValueRef<'_>,
            ) -> ::rusqlite::types::FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| ::rusqlite::types::FromSqlError::Other(e.into()))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    db_enum! {
        enum Color {
            Red => "red",
            DarkBlue => "dark_blue",
        }
    }

    #[test]
    fn test_db_enum_string_conversion() {
        assert_eq!(Color::DarkBlue.as_str(), "dark_blue");
        assert_eq!("red".parse::<Color>().unwrap(), Color::Red);
        assert!("green".parse::<Color>().is_err());
        assert_eq!(Color::Red.to_string(), "red");
        assert_eq!(Color::ALL.len(), 2);
    }

    #[test]
    fn test_db_enum_serde_uses_wire_names() {
        let json = serde_json::to_string(&Color::DarkBlue).unwrap();
        assert_eq!(json, "\"dark_blue\"");
        let back: Color = serde_json::from_str("\"red\"").unwrap();
        assert_eq!(back, Color::Red);
    }

    #[test]
    fn test_db_enum_sql_round_trip() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (c TEXT)", []).unwrap();
        conn.execute("INSERT INTO t (c) VALUES (?1)", [Color::DarkBlue])
            .unwrap();
        let c: Color = conn.query_row("SELECT c FROM t", [], |r| r.get(0)).unwrap();
        assert_eq!(c, Color::DarkBlue);
    }
}
