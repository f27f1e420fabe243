use std::time::Duration;

/// Delays of the startup sequence, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BringUpConfig {
    /// Wait before touching the image at all
    pub initial_delay_ms: u64,
    pub poll_interval_ms: u64,
    /// Wait after the world appears
    pub settle_delay_ms: u64,
    /// Give up polling for the world after this long. `None` polls forever.
    pub poll_timeout_ms: Option<u64>,
}

impl Default for BringUpConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10_000,
            poll_interval_ms: 1_000,
            settle_delay_ms: 5_000,
            poll_timeout_ms: None,
        }
    }
}

impl BringUpConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(feature = "serde")]
pub use profiles::*;

#[cfg(feature = "serde")]
mod profiles {
    use std::borrow::Cow;

    use itertools::Itertools;
    use serde::{Deserialize, Serialize};

    use crate::{
        ResolveError, Result, Role, Signature, SignatureSource, VersionProfile, VersionRegistry,
    };

    /// Version profiles as stored in JSON
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProfileConfig {
        pub profiles: Vec<ProfileEntry>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ProfileEntry {
        pub min: i32,
        pub max: i32,
        pub signatures: Vec<SignatureEntry>,
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SignatureEntry {
        pub role: Role,
        #[serde(flatten)]
        pub source: SourceEntry,
        #[serde(default, skip_serializing_if = "is_zero")]
        pub displacement: usize,
        #[serde(default, skip_serializing_if = "is_zero")]
        pub extra: isize,
    }

    fn is_zero<T: Default + PartialEq>(value: &T) -> bool {
        *value == T::default()
    }

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum SourceEntry {
        /// Pattern text
        Pattern(String),
        /// Encrypted blob as hex, whitespace ignored
        Encrypted(String),
    }

    fn parse_hex(hex: &str) -> Result<Vec<u8>> {
        let digits = hex
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<Vec<_>>();
        if digits.len() % 2 != 0 {
            return Err(ResolveError::InvalidSignature(format!(
                "odd number of hex digits in {hex:?}"
            )));
        }
        digits
            .chunks(2)
            .map(|pair| {
                let byte = pair.iter().collect::<String>();
                u8::from_str_radix(&byte, 16)
                    .map_err(|_| ResolveError::InvalidSignature(format!("bad hex byte {byte:?}")))
            })
            .collect()
    }

    impl SignatureEntry {
        fn to_signature(&self) -> Result<Signature> {
            let source = match &self.source {
                SourceEntry::Pattern(text) => SignatureSource::Plain(Cow::Owned(text.clone())),
                SourceEntry::Encrypted(hex) => {
                    SignatureSource::Encrypted(Cow::Owned(parse_hex(hex)?))
                }
            };
            Ok(Signature {
                role: self.role,
                source,
                displacement: self.displacement,
                extra: self.extra,
            })
        }

        fn from_signature(signature: &Signature) -> Self {
            let source = match &signature.source {
                SignatureSource::Plain(text) => SourceEntry::Pattern(text.to_string()),
                SignatureSource::Encrypted(blob) => {
                    SourceEntry::Encrypted(blob.iter().map(|b| format!("{b:02X}")).join(" "))
                }
            };
            Self {
                role: signature.role,
                source,
                displacement: signature.displacement,
                extra: signature.extra,
            }
        }
    }

    impl ProfileConfig {
        pub fn from_json(json: &str) -> serde_json::Result<Self> {
            serde_json::from_str(json)
        }

        pub fn to_json(&self) -> serde_json::Result<String> {
            serde_json::to_string_pretty(self)
        }

        /// Build a validated registry
        pub fn into_registry(self) -> Result<VersionRegistry> {
            let profiles = self
                .profiles
                .iter()
                .map(|p| {
                    Ok(VersionProfile::new(
                        p.min,
                        p.max,
                        p.signatures
                            .iter()
                            .map(SignatureEntry::to_signature)
                            .collect::<Result<_>>()?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            VersionRegistry::new(profiles)
        }

        pub fn from_registry(registry: &VersionRegistry) -> Self {
            Self {
                profiles: registry
                    .profiles()
                    .iter()
                    .map(|p| ProfileEntry {
                        min: p.min,
                        max: p.max,
                        signatures: p
                            .signatures
                            .iter()
                            .map(SignatureEntry::from_signature)
                            .collect(),
                    })
                    .collect(),
            }
        }
    }

}
