use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::{DiscoveryStep, PackageIdentity};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    NotInstalled,
    InvalidInput,
    ParseFailure,
    Timeout,
    TransportFailure,
    HttpStatus,
    ProcessFailure,
    Untrusted,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CoreError {
    pub app: Option<PackageIdentity>,
    pub step: Option<DiscoveryStep>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            app: None,
            step: None,
            kind,
            message: message.into(),
        }
    }

    /// Fills in the app and step when the collaborator that raised the error
    /// did not know them.
    pub fn attributed(self, app: &PackageIdentity, step: DiscoveryStep) -> Self {
        Self {
            app: self.app.or_else(|| Some(app.clone())),
            step: self.step.or(Some(step)),
            kind: self.kind,
            message: self.message,
        }
    }
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for CoreError {}
