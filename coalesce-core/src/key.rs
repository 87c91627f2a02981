// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Identifiers used as aggregation keys.
//!
//! Resource identifiers are only unique within their owning domain. Schedulers are created once per
//! domain, so the keys they aggregate carry the bare resource id and the [`DomainId`] lives on the
//! store that persists them.

use std::{borrow::Borrow, fmt};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id! {
    /// The tenant (hosted domain) that owns a set of resources.
    DomainId
}

string_id! {
    /// Identifier of a paste bin. Views of a paste are aggregated by this key.
    PasteId
}

string_id! {
    /// Identifier of a short URL. Visits of a short URL are aggregated by this key.
    ShortUrlId
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn display_and_debug() {
        let id = PasteId::from("p_1");
        check!(id.to_string() == "p_1");
        check!(format!("{id:?}") == r#"PasteId("p_1")"#);
        check!(ShortUrlId::new(String::from("abc")).as_str() == "abc");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_as_plain_string() {
        let id = DomainId::new("files.example.com");
        check!(serde_json::to_string(&id).unwrap() == r#""files.example.com""#);
        let back: DomainId = serde_json::from_str(r#""files.example.com""#).unwrap();
        check!(back == id);
    }
}
