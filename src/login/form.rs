use serde::Serialize;

use super::fingerprint::generate_fingerprint;

/// Username/password submission, `currentMenu=1`.
#[derive(Debug, Clone, Serialize)]
pub struct PasswordLoginForm {
    pub username: String,
    /// `__RSA__`-wrapped cipher text.
    pub password: String,
    #[serde(rename = "currentMenu")]
    pub current_menu: u8,
    #[serde(rename = "mfaState")]
    pub mfa_state: String,
    pub geolocation: String,
    #[serde(rename = "fpVisitorId")]
    pub fingerprint: String,
    #[serde(rename = "_eventId")]
    pub event_id: &'static str,
    pub execution: String,
}

/// QR-code submission after the scan was confirmed, `currentMenu=3`.
#[derive(Debug, Clone, Serialize)]
pub struct QrLoginForm {
    #[serde(rename = "qrCodeKey")]
    pub qr_code_key: String,
    #[serde(rename = "currentMenu")]
    pub current_menu: u8,
    pub geolocation: String,
    #[serde(rename = "fpVisitorId")]
    pub fingerprint: String,
    #[serde(rename = "_eventId")]
    pub event_id: &'static str,
    pub execution: String,
}

/// SMS dynamic-code (passwordless) submission, `currentMenu=2`.
#[derive(Debug, Clone, Serialize)]
pub struct DynCodeLoginForm {
    pub username: String,
    /// The code received by SMS.
    pub password: String,
    #[serde(rename = "currentMenu")]
    pub current_menu: u8,
    #[serde(rename = "mfaState")]
    pub mfa_state: String,
    pub geolocation: String,
    #[serde(rename = "fpVisitorId")]
    pub fingerprint: String,
    #[serde(rename = "_eventId")]
    pub event_id: &'static str,
    pub execution: String,
}

impl PasswordLoginForm {
    pub fn new(username: &str, wrapped_password: &str, mfa_state: &str) -> Self {
        PasswordLoginForm {
            username: username.to_string(),
            password: wrapped_password.to_string(),
            current_menu: 1,
            mfa_state: mfa_state.to_string(),
            geolocation: String::new(),
            fingerprint: generate_fingerprint().visitor_id,
            event_id: "submit",
            execution: String::new(),
        }
    }
}

impl QrLoginForm {
    pub fn new(qr_code_key: &str) -> Self {
        QrLoginForm {
            qr_code_key: qr_code_key.to_string(),
            current_menu: 3,
            geolocation: String::new(),
            fingerprint: generate_fingerprint().visitor_id,
            event_id: "submit",
            execution: String::new(),
        }
    }
}

impl DynCodeLoginForm {
    pub fn new(username: &str, code: &str, mfa_state: &str) -> Self {
        DynCodeLoginForm {
            username: username.to_string(),
            password: code.to_string(),
            current_menu: 2,
            mfa_state: mfa_state.to_string(),
            geolocation: String::new(),
            fingerprint: generate_fingerprint().visitor_id,
            event_id: "submitPasswordlessToken",
            execution: String::new(),
        }
    }
}

/// Any form accepted by the completion driver.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoginForm {
    Password(PasswordLoginForm),
    Qr(QrLoginForm),
    DynCode(DynCodeLoginForm),
}

impl LoginForm {
    pub fn set_execution(&mut self, execution: &str) {
        let field = match self {
            LoginForm::Password(form) => &mut form.execution,
            LoginForm::Qr(form) => &mut form.execution,
            LoginForm::DynCode(form) => &mut form.execution,
        };
        *field = execution.to_string();
    }

    pub fn execution(&self) -> &str {
        match self {
            LoginForm::Password(form) => &form.execution,
            LoginForm::Qr(form) => &form.execution,
            LoginForm::DynCode(form) => &form.execution,
        }
    }
}

impl From<PasswordLoginForm> for LoginForm {
    fn from(form: PasswordLoginForm) -> Self {
        LoginForm::Password(form)
    }
}

impl From<QrLoginForm> for LoginForm {
    fn from(form: QrLoginForm) -> Self {
        LoginForm::Qr(form)
    }
}

impl From<DynCodeLoginForm> for LoginForm {
    fn from(form: DynCodeLoginForm) -> Self {
        LoginForm::DynCode(form)
    }
}
