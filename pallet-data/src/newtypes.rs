/// Generates a `String` newtype validated by a regular expression.
///
/// The generated type implements [`Debug`], [`Display`](std::fmt::Display),
/// [`Clone`], [`Eq`], [`PartialEq`], [`Ord`], [`PartialOrd`], [`Hash`],
/// [`FromStr`](std::str::FromStr), [`Deref<Target = str>`](std::ops::Deref),
/// [`Borrow<str>`](std::borrow::Borrow), [`serde::Serialize`] and a
/// validating [`serde::Deserialize`], so values read from untrusted TOML or
/// JSON documents are checked at the deserialization boundary.
///
/// Validation uses `fancy_regex` since some of the reserved-name rules need
/// negative lookaheads.
macro_rules! data_newtype {
    (
        $(#[$type_attributes:meta])*
        $name:ident,
        $(#[$error_type_attributes:meta])*
        $error_name:ident,
        $regex:expr
    ) => {
        $(#[$type_attributes])*
        #[derive(
            Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, ::serde::Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        $(#[$error_type_attributes])*
        #[derive(::thiserror::Error, Debug, Eq, PartialEq)]
        pub enum $error_name {
            #[error("invalid value: {0}")]
            InvalidValue(String),
        }

        impl ::std::str::FromStr for $name {
            type Err = $error_name;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let regex_matches = ::fancy_regex::Regex::new($regex)
                    .and_then(|regex| regex.is_match(value))
                    .unwrap_or(false);

                if regex_matches {
                    Ok(Self(String::from(value)))
                } else {
                    Err($error_name::InvalidValue(String::from(value)))
                }
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                <String as ::serde::Deserialize>::deserialize(deserializer)?
                    .parse()
                    .map_err(::serde::de::Error::custom)
            }
        }

        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl ::std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.0)
            }
        }
    };
}

pub(crate) use data_newtype;
