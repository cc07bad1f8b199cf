//! Forms collaborator interface
//!
//! The form/field definition CRUD and answer storage live outside the core
//! engine. The engine only needs to fetch a step's form (with its password
//! protection flag), record a response, and check response ownership.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::process::UserId;
use crate::CoreError;

/// Value object: Form ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormId(pub String);

/// Value object: Form field ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId(pub String);

/// Value object: recorded response ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponseId(pub String);

impl FormId {
    /// Generate a fresh form ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for FormId {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldId {
    /// Generate a fresh field ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for FieldId {
    fn default() -> Self {
        Self::new()
    }
}

/// A field's type, carried as explicit data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Free text
    Text,
    /// One choice from a fixed list
    Select,
    /// Boolean toggle
    Checkbox,
    /// Numeric value
    Number,
    /// Calendar date
    Date,
}

/// One field of a form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormField {
    /// Unique identifier
    pub id: FieldId,

    /// The question shown to the participant
    pub label: String,

    /// Field type tag
    pub field_type: FieldType,

    /// Whether an answer is required
    pub required: bool,
}

/// A step's form as seen by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepForm {
    /// Unique identifier
    pub form_id: FormId,

    /// Access password; present iff the form is password protected.
    /// Never serialized toward callers.
    #[serde(skip_serializing, default)]
    pub password: Option<String>,

    /// The form's fields
    pub fields: Vec<FormField>,
}

impl StepForm {
    /// Whether submissions against this form require a password
    pub fn is_password_protected(&self) -> bool {
        self.password.is_some()
    }

    /// Whether the given field belongs to this form
    pub fn has_field(&self, id: &FieldId) -> bool {
        self.fields.iter().any(|f| &f.id == id)
    }
}

/// One answer within a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    /// The field being answered
    pub field_id: FieldId,

    /// The answer payload
    pub value: Value,
}

/// Collaborator interface for the external forms service
#[async_trait]
pub trait FormsProvider: Send + Sync {
    /// Fetch a form definition
    async fn step_form(&self, form_id: &FormId) -> Result<StepForm, CoreError>;

    /// Persist an answer set for a form, returning the recorded response ID
    async fn record_response(
        &self,
        form_id: &FormId,
        user: Option<&UserId>,
        answers: &[Answer],
    ) -> Result<ResponseId, CoreError>;

    /// Whether the recorded response belongs to the given form
    async fn response_belongs_to_form(
        &self,
        response_id: &ResponseId,
        form_id: &FormId,
    ) -> Result<bool, CoreError>;

    /// Remove a recorded response (submission deletion cascade)
    async fn delete_response(&self, response_id: &ResponseId) -> Result<(), CoreError>;
}

/// In-memory forms collaborator, used for testing and the memory:// runtime
pub mod memory {
    use super::*;
    use dashmap::DashMap;

    struct StoredResponse {
        form_id: FormId,
        #[allow(dead_code)]
        user: Option<UserId>,
        #[allow(dead_code)]
        answers: Vec<Answer>,
    }

    /// In-memory implementation of [`FormsProvider`]
    #[derive(Default)]
    pub struct InMemoryFormsProvider {
        forms: DashMap<String, StepForm>,
        responses: DashMap<String, StoredResponse>,
    }

    impl InMemoryFormsProvider {
        /// Create an empty forms registry
        pub fn new() -> Self {
            Self::default()
        }

        /// Register a form definition, returning its ID
        pub fn register_form(&self, password: Option<String>, fields: Vec<FormField>) -> FormId {
            let form_id = FormId::new();
            self.forms.insert(
                form_id.0.clone(),
                StepForm {
                    form_id: form_id.clone(),
                    password,
                    fields,
                },
            );
            form_id
        }
    }

    #[async_trait]
    impl FormsProvider for InMemoryFormsProvider {
        async fn step_form(&self, form_id: &FormId) -> Result<StepForm, CoreError> {
            self.forms
                .get(&form_id.0)
                .map(|f| f.clone())
                .ok_or_else(|| CoreError::NotFound("Form".to_string()))
        }

        async fn record_response(
            &self,
            form_id: &FormId,
            user: Option<&UserId>,
            answers: &[Answer],
        ) -> Result<ResponseId, CoreError> {
            if !self.forms.contains_key(&form_id.0) {
                return Err(CoreError::NotFound("Form".to_string()));
            }
            let response_id = ResponseId(Uuid::new_v4().to_string());
            self.responses.insert(
                response_id.0.clone(),
                StoredResponse {
                    form_id: form_id.clone(),
                    user: user.cloned(),
                    answers: answers.to_vec(),
                },
            );
            Ok(response_id)
        }

        async fn response_belongs_to_form(
            &self,
            response_id: &ResponseId,
            form_id: &FormId,
        ) -> Result<bool, CoreError> {
            let response = self
                .responses
                .get(&response_id.0)
                .ok_or_else(|| CoreError::NotFound("Response".to_string()))?;
            Ok(response.form_id == *form_id)
        }

        async fn delete_response(&self, response_id: &ResponseId) -> Result<(), CoreError> {
            self.responses.remove(&response_id.0);
            Ok(())
        }
    }
}
