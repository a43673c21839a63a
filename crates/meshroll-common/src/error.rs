//! Error types for the member-roll operator
//!
//! Errors are structured with fields to aid debugging in production. Per-resource
//! failures carry the identity of the object that failed so that a pass which
//! collects many of them into an [`AggregateError`] still says exactly what broke.

use std::fmt;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for member-roll operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A write or delete against one specific resource failed
    #[error("failed to {verb} {kind} {}: {source}", display_key(.namespace.as_deref(), .name))]
    Operation {
        /// What was attempted (create, patch, delete, ...)
        verb: &'static str,
        /// Resource kind (Namespace, RoleBinding, ...)
        kind: &'static str,
        /// Namespace of the resource, if namespaced
        namespace: Option<String>,
        /// Name of the resource
        name: String,
        /// The underlying kube-rs error
        source: kube::Error,
    },

    /// The member roll's namespace does not contain exactly one control plane
    #[error("failed to locate single ServiceMeshControlPlane for project {namespace} (found {found})")]
    ControlPlaneCardinality {
        /// Namespace that was searched
        namespace: String,
        /// How many control planes were found
        found: usize,
    },

    /// A resource a member depends on does not exist yet
    #[error("{kind} {namespace}/{name} not found: {message}")]
    MissingResource {
        /// Resource kind (ServiceAccount, ...)
        kind: &'static str,
        /// Namespace of the resource
        namespace: String,
        /// Name of the resource
        name: String,
        /// Why the resource is needed
        message: String,
    },

    /// Several independent failures collected during one pass
    #[error("{0}")]
    Aggregate(AggregateError),

    /// Invalid resource contents
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// The resource that failed validation
        resource: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "telemetry")
        context: String,
    },
}

fn display_key(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

/// A flattened list of errors from one reconciliation pass.
///
/// Displays like the Kubernetes `utilerrors` aggregate: a single error prints
/// as itself, several print as `[a, b, c]`.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// The individual errors, never nested aggregates
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Number of collected errors
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Whether no errors were collected
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{}", only);
        }
        write!(f, "[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        write!(f, "]")
    }
}

impl Error {
    /// Combine collected errors into one result.
    ///
    /// Empty input is success, a single error is returned as-is, and anything
    /// more becomes a flattened [`Error::Aggregate`].
    pub fn aggregate(errors: Vec<Error>) -> Result<(), Error> {
        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                Error::Aggregate(inner) => flat.extend(inner.errors),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Ok(()),
            1 => Err(flat.remove(0)),
            _ => Err(Error::Aggregate(AggregateError { errors: flat })),
        }
    }

    /// Create an operation error for a namespaced resource
    pub fn operation(
        verb: &'static str,
        kind: &'static str,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Operation {
            verb,
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
            source,
        }
    }

    /// Create an operation error for a cluster-scoped resource
    pub fn cluster_operation(
        verb: &'static str,
        kind: &'static str,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::Operation {
            verb,
            kind,
            namespace: None,
            name: name.into(),
            source,
        }
    }

    /// Create a validation error for a resource
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Only a control-plane cardinality problem or invalid input waits for the
    /// next watch event. API failures on individual resources are retried,
    /// since RBAC grants and admission changes raise no event on the roll.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ControlPlaneCardinality { .. } | Error::Validation { .. } => false,
            Error::Aggregate(inner) => inner.errors.iter().any(Error::is_retryable),
            Error::Kube { .. }
            | Error::Operation { .. }
            | Error::MissingResource { .. }
            | Error::Serialization { .. }
            | Error::Internal { .. } => true,
        }
    }

    /// Whether this error wraps an HTTP 409 optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Kube { source } | Error::Operation { source, .. } => is_conflict(source),
            _ => false,
        }
    }
}

/// Whether the API reports the object as absent (404 Not Found or 410 Gone)
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404 || ae.code == 410)
}

/// Whether a create failed because the object already exists
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// Whether a write failed on a stale `resourceVersion`
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict")
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}
