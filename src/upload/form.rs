//! Form model: the controls posted along with an upload

use std::sync::{Arc, Mutex};
use tracing::debug;

use super::types::{lock, FieldId, FormId, Payload, UploadField};

/// Name of the control that carries the session identity
pub const DEFAULT_IDENTITY_FIELD: &str = "$uuid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Plain value posted as a text part
    Text,
    /// File selector; its name is the upload field id
    Upload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormControl {
    pub name: String,
    pub kind: ControlKind,
    pub value: String,
    pub disabled: bool,
}

impl FormControl {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ControlKind::Text,
            value: value.into(),
            disabled: false,
        }
    }

    pub fn upload(field: &FieldId) -> Self {
        Self {
            name: field.as_str().to_string(),
            kind: ControlKind::Upload,
            value: String::new(),
            disabled: false,
        }
    }
}

/// A form owning upload fields and other controls
#[derive(Debug)]
pub struct Form {
    id: FormId,
    controls: Mutex<Vec<FormControl>>,
}

impl Form {
    pub fn new(id: impl Into<FormId>) -> Self {
        Self {
            id: id.into(),
            controls: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &FormId {
        &self.id
    }

    /// Add a control, replacing any existing control with the same name
    pub fn add_control(&self, control: FormControl) {
        let mut controls = lock(&self.controls);
        match controls.iter_mut().find(|c| c.name == control.name) {
            Some(existing) => *existing = control,
            None => controls.push(control),
        }
    }

    pub fn add_text(&self, name: impl Into<String>, value: impl Into<String>) {
        self.add_control(FormControl::text(name, value));
    }

    /// Create an upload field and register its control on this form
    pub fn add_upload(&self, field: impl Into<FieldId>) -> Arc<UploadField> {
        let field = UploadField::new(field);
        self.add_control(FormControl::upload(field.id()));
        Arc::new(field)
    }

    pub fn set_disabled(&self, name: &str, disabled: bool) -> bool {
        let mut controls = lock(&self.controls);
        match controls.iter_mut().find(|c| c.name == name) {
            Some(control) => {
                control.disabled = disabled;
                true
            }
            None => false,
        }
    }

    pub fn is_disabled(&self, name: &str) -> Option<bool> {
        lock(&self.controls)
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.disabled)
    }

    pub fn controls(&self) -> Vec<FormControl> {
        lock(&self.controls).clone()
    }

    /// Disable every enabled control for which `keep` is false.
    ///
    /// The returned guard re-enables exactly the controls it disabled when
    /// dropped; controls that were already disabled stay disabled.
    pub(crate) fn disable_except<F>(&self, keep: F) -> DisabledControls<'_>
    where
        F: Fn(&FormControl) -> bool,
    {
        let mut controls = lock(&self.controls);
        let mut names = Vec::new();

        for control in controls.iter_mut() {
            if !keep(control) && !control.disabled {
                control.disabled = true;
                names.push(control.name.clone());
            }
        }

        debug!(form_id = %self.id, disabled = names.len(), "Disabled form controls");

        DisabledControls { form: self, names }
    }
}

/// Controls temporarily disabled while a submission is captured
#[derive(Debug)]
pub(crate) struct DisabledControls<'a> {
    form: &'a Form,
    names: Vec<String>,
}

impl Drop for DisabledControls<'_> {
    fn drop(&mut self) {
        let mut controls = lock(&self.form.controls);
        for control in controls.iter_mut() {
            if self.names.contains(&control.name) {
                control.disabled = false;
            }
        }
    }
}

/// File part of a submission
#[derive(Debug, Clone)]
pub struct FilePart {
    pub name: String,
    pub payload: Payload,
}

/// Snapshot of a form ready to be posted as multipart data
#[derive(Debug, Clone)]
pub struct FormSubmission {
    pub form_id: FormId,
    pub url: String,
    pub fields: Vec<(String, String)>,
    pub file: FilePart,
}

impl FormSubmission {
    /// Capture the enabled controls of `form` plus the payload of `field`.
    ///
    /// Returns `None` if the field has no payload or its control is missing
    /// or disabled.
    pub fn capture(form: &Form, field: &UploadField, url: impl Into<String>) -> Option<Self> {
        Self::capture_with(form, field.id(), field.payload()?, url)
    }

    /// Capture with a payload already taken from the field.
    /// `None` means the field's upload control is missing or disabled.
    pub(crate) fn capture_with(
        form: &Form,
        field_id: &FieldId,
        payload: Payload,
        url: impl Into<String>,
    ) -> Option<Self> {
        let controls = lock(&form.controls);

        let mut fields = Vec::new();
        let mut file = None;

        for control in controls.iter().filter(|c| !c.disabled) {
            match control.kind {
                ControlKind::Text => fields.push((control.name.clone(), control.value.clone())),
                ControlKind::Upload if control.name == field_id.as_str() => {
                    file = Some(FilePart {
                        name: control.name.clone(),
                        payload: payload.clone(),
                    });
                }
                ControlKind::Upload => {}
            }
        }

        Some(Self {
            form_id: form.id().clone(),
            url: url.into(),
            fields,
            file: file?,
        })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_form() -> (Form, Arc<UploadField>, Arc<UploadField>) {
        let form = Form::new("orders");
        form.add_text(DEFAULT_IDENTITY_FIELD, "session-1");
        form.add_text("comment", "hello");
        form.add_text("locked", "x");
        form.set_disabled("locked", true);
        let first = form.add_upload("attachment-1");
        let second = form.add_upload("attachment-2");
        (form, first, second)
    }

    #[test]
    fn test_disable_guard_restores_only_what_it_changed() {
        let (form, first, _second) = sample_form();

        {
            let _guard = form.disable_except(|c| {
                c.name == DEFAULT_IDENTITY_FIELD || c.name == first.id().as_str()
            });
            assert_eq!(form.is_disabled("comment"), Some(true));
            assert_eq!(form.is_disabled("attachment-2"), Some(true));
            assert_eq!(form.is_disabled(DEFAULT_IDENTITY_FIELD), Some(false));
            assert_eq!(form.is_disabled("attachment-1"), Some(false));
        }

        assert_eq!(form.is_disabled("comment"), Some(false));
        assert_eq!(form.is_disabled("attachment-2"), Some(false));
        assert_eq!(form.is_disabled("locked"), Some(true));
    }

    #[test]
    fn test_capture_skips_disabled_controls() {
        let (form, first, _second) = sample_form();
        first.select(Payload::new("a.pdf", b"pdf".to_vec())).unwrap();

        let submission = FormSubmission::capture(&form, &first, "http://host/upload").unwrap();

        assert_eq!(submission.form_id.as_str(), "orders");
        assert_eq!(submission.field(DEFAULT_IDENTITY_FIELD), Some("session-1"));
        assert_eq!(submission.field("comment"), Some("hello"));
        assert_eq!(submission.field("locked"), None);
        assert_eq!(submission.file.name, "attachment-1");
        assert_eq!(submission.file.payload.file_name, "a.pdf");
    }

    #[test]
    fn test_capture_without_payload() {
        let (form, first, _second) = sample_form();
        assert!(FormSubmission::capture(&form, &first, "http://host/upload").is_none());
    }

    #[test]
    fn test_capture_with_disabled_upload_control() {
        let (form, first, _second) = sample_form();
        let payload = Payload::new("a.pdf", b"pdf".to_vec());

        assert!(
            FormSubmission::capture_with(&form, first.id(), payload.clone(), "http://host/upload")
                .is_some()
        );

        form.set_disabled("attachment-1", true);
        assert!(
            FormSubmission::capture_with(&form, first.id(), payload, "http://host/upload")
                .is_none()
        );
    }

    #[test]
    fn test_add_control_replaces_same_name() {
        let form = Form::new("f");
        form.add_text("a", "1");
        form.add_text("a", "2");

        let controls = form.controls();
        assert_eq!(controls.len(), 1);
        assert_eq!(controls[0].value, "2");
    }
}
