/// Process and step definition management service
pub mod definition_service;

/// Guest credential issue/validate/revoke
pub mod credentials;

/// Instance lifecycle: start, submit, delete submission, abort
pub mod execution_service;

/// Background reclaimer of expired guest instances
pub mod sweeper;
