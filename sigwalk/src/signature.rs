use std::borrow::Cow;

use sigwalk_image::{resolve_displacement, Image};
use sigwalk_scanner::{cipher, Pattern};
use strum::{AsRefStr, Display, EnumCount, EnumIter, EnumString};
use tracing::debug;

use crate::{ResolveError, Result};

/// The five addresses every version profile locates
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    EnumCount,
    AsRefStr,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Global object table
    GObjects,
    ProcessEvent,
    FNameToString,
    GWorld,
    InputKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureSource {
    /// Pattern text stored as is
    Plain(Cow<'static, str>),
    /// Pattern text stored through [`cipher`], NUL terminated
    Encrypted(Cow<'static, [u8]>),
}

impl SignatureSource {
    pub fn text(&self) -> Cow<'_, str> {
        match self {
            Self::Plain(text) => Cow::Borrowed(text),
            Self::Encrypted(blob) => Cow::Owned(cipher::decode_to_string(blob)),
        }
    }
}

/// A pattern for one [`Role`] plus how to turn its match into the target address.
///
/// `displacement` is the position of an embedded 32-bit relative operand inside the match (0 for
/// none) and `extra` is added to the result afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub role: Role,
    pub source: SignatureSource,
    pub displacement: usize,
    pub extra: isize,
}

impl Signature {
    pub const fn plain(role: Role, text: &'static str, displacement: usize) -> Self {
        Self {
            role,
            source: SignatureSource::Plain(Cow::Borrowed(text)),
            displacement,
            extra: 0,
        }
    }

    pub const fn encrypted(role: Role, blob: &'static [u8], displacement: usize) -> Self {
        Self {
            role,
            source: SignatureSource::Encrypted(Cow::Borrowed(blob)),
            displacement,
            extra: 0,
        }
    }

    pub fn with_extra(mut self, extra: isize) -> Self {
        self.extra = extra;
        self
    }

    pub fn text(&self) -> Cow<'_, str> {
        self.source.text()
    }

    pub fn pattern(&self) -> Pattern {
        Pattern::new(self.text())
    }

    /// Scan `image` and resolve the match to an absolute address
    pub fn resolve(&self, image: &Image<'_>) -> Result<usize> {
        let pattern = self.pattern();
        let found = image
            .find(&pattern)
            .ok_or(ResolveError::SignatureNotFound { role: self.role })?;
        let address = resolve_displacement(image, found, self.displacement, self.extra)?;
        debug!(
            "{}: matched at {found:#x}, resolved to {address:#x}",
            self.role
        );
        Ok(address)
    }
}
