use crate::secrets::registry::SecretType;
use crate::secrets::{
    CodecError, Result, MAX_CARD_HOLDER_LENGTH, MAX_FILE_SIZE, MAX_PASSWORD_LENGTH,
    MAX_TEXT_SIZE, MAX_URL_LENGTH, MAX_USERNAME_LENGTH,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CARD_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{13,19}$").expect("valid card number pattern"));
static EXPIRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0[1-9]|1[0-2])/(\d{2}|\d{4})$").expect("valid expiry pattern")
});

/// Field constraints checked before a payload is stored or sent.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(msg: impl Into<String>) -> CodecError {
    CodecError::Validation(msg.into())
}

fn required<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(format!("{} is required", field)));
    }
    Ok(trimmed)
}

fn max_len(value: &str, max: usize, field: &str) -> Result<()> {
    if value.len() > max {
        return Err(invalid(format!(
            "{} too long: {} characters (max: {})",
            field,
            value.len(),
            max
        )));
    }
    Ok(())
}

/// Website or service credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

impl Validate for LoginData {
    fn validate(&self) -> Result<()> {
        let username = required(&self.username, "username")?;
        max_len(username, MAX_USERNAME_LENGTH, "username")?;

        let password = required(&self.password, "password")?;
        max_len(password, MAX_PASSWORD_LENGTH, "password")?;

        if !self.url.is_empty() {
            max_len(self.url.trim(), MAX_URL_LENGTH, "URL")?;
        }
        Ok(())
    }
}

/// Free-form text note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    pub content: String,
}

impl Validate for TextData {
    fn validate(&self) -> Result<()> {
        required(&self.content, "content")?;
        max_len(&self.content, MAX_TEXT_SIZE, "text content")
    }
}

/// Binary file, content carried as an encoded string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub file_name: String,
    pub file_size: i64,
    pub content: String,
}

impl Validate for FileData {
    fn validate(&self) -> Result<()> {
        required(&self.file_name, "file name")?;
        required(&self.content, "content")?;
        if self.file_size > MAX_FILE_SIZE {
            return Err(invalid(format!(
                "file size {} bytes exceeds maximum {} bytes",
                self.file_size, MAX_FILE_SIZE
            )));
        }
        Ok(())
    }
}

/// Payment card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardData {
    pub number: String,
    pub holder: String,
    pub expiry: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cvv: String,
}

impl Validate for CardData {
    fn validate(&self) -> Result<()> {
        if !CARD_NUMBER_RE.is_match(&self.number.replace(' ', "")) {
            return Err(invalid("invalid card number format"));
        }

        let holder = required(&self.holder, "card holder name")?;
        max_len(holder, MAX_CARD_HOLDER_LENGTH, "card holder name")?;

        if !EXPIRY_RE.is_match(&self.expiry) {
            return Err(invalid("invalid expiry format, use MM/YY or MM/YYYY"));
        }

        required(&self.cvv, "CVV")?;
        if !self.cvv.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("CVV must contain only digits"));
        }
        if self.cvv.len() != 3 && self.cvv.len() != 4 {
            return Err(invalid(format!(
                "CVV must be 3 or 4 digits, got {}",
                self.cvv.len()
            )));
        }
        Ok(())
    }
}

/// One decoded secret payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretData {
    Login(LoginData),
    Text(TextData),
    File(FileData),
    Card(CardData),
}

impl SecretData {
    pub fn secret_type(&self) -> SecretType {
        match self {
            SecretData::Login(_) => SecretType::Password,
            SecretData::Text(_) => SecretType::Text,
            SecretData::File(_) => SecretType::Binary,
            SecretData::Card(_) => SecretType::Card,
        }
    }

    /// Canonical JSON of the variant object, without the type tag.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let bytes = match self {
            SecretData::Login(d) => serde_json::to_vec(d)?,
            SecretData::Text(d) => serde_json::to_vec(d)?,
            SecretData::File(d) => serde_json::to_vec(d)?,
            SecretData::Card(d) => serde_json::to_vec(d)?,
        };
        Ok(bytes)
    }

    pub(crate) fn to_value(&self) -> Result<serde_json::Value> {
        let value = match self {
            SecretData::Login(d) => serde_json::to_value(d)?,
            SecretData::Text(d) => serde_json::to_value(d)?,
            SecretData::File(d) => serde_json::to_value(d)?,
            SecretData::Card(d) => serde_json::to_value(d)?,
        };
        Ok(value)
    }
}

impl Validate for SecretData {
    fn validate(&self) -> Result<()> {
        match self {
            SecretData::Login(d) => d.validate(),
            SecretData::Text(d) => d.validate(),
            SecretData::File(d) => d.validate(),
            SecretData::Card(d) => d.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> CardData {
        CardData {
            number: "4111 1111 1111 1111".to_string(),
            holder: "Alice Example".to_string(),
            expiry: "12/29".to_string(),
            cvv: "123".to_string(),
        }
    }

    #[test]
    fn test_login_requires_trimmed_fields() {
        let data = LoginData {
            username: "   ".to_string(),
            password: "pw".to_string(),
            url: String::new(),
        };
        assert!(matches!(data.validate(), Err(CodecError::Validation(_))));

        let data = LoginData {
            username: "alice".to_string(),
            password: "pw".to_string(),
            url: "https://example.com".to_string(),
        };
        assert!(data.validate().is_ok());
    }

    #[test]
    fn test_login_length_limits() {
        let data = LoginData {
            username: "a".repeat(MAX_USERNAME_LENGTH + 1),
            password: "pw".to_string(),
            url: String::new(),
        };
        assert!(data.validate().is_err());

        let data = LoginData {
            username: "alice".to_string(),
            password: "pw".to_string(),
            url: "u".repeat(MAX_URL_LENGTH + 1),
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_login_url_omitted_when_empty() {
        let data = LoginData {
            username: "alice".to_string(),
            password: "pw".to_string(),
            url: String::new(),
        };
        let json = SecretData::Login(data).to_json().unwrap();
        assert_eq!(json, br#"{"username":"alice","password":"pw"}"#.to_vec());
    }

    #[test]
    fn test_text_limits() {
        assert!(TextData { content: "note".into() }.validate().is_ok());
        assert!(TextData { content: "\n\t ".into() }.validate().is_err());
        assert!(TextData {
            content: "x".repeat(MAX_TEXT_SIZE + 1)
        }
        .validate()
        .is_err());
    }

    #[test]
    fn test_file_size_ceiling() {
        let mut file = FileData {
            file_name: "report.pdf".to_string(),
            file_size: MAX_FILE_SIZE,
            content: "AAAA".to_string(),
        };
        assert!(file.validate().is_ok());

        file.file_size = MAX_FILE_SIZE + 1;
        assert!(file.validate().is_err());
    }

    #[test]
    fn test_card_valid() {
        assert!(card().validate().is_ok());
        let mut c = card();
        c.expiry = "01/2031".to_string();
        c.cvv = "1234".to_string();
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_card_number_format() {
        let mut c = card();
        c.number = "4111-1111-1111-1111".to_string();
        assert!(c.validate().is_err());

        c.number = "411111111111".to_string();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_card_expiry_format() {
        for bad in ["13/25", "00/25", "1/25", "12/255", "12-25"] {
            let mut c = card();
            c.expiry = bad.to_string();
            assert!(c.validate().is_err(), "expiry {bad} should be rejected");
        }
    }

    #[test]
    fn test_card_cvv_rules() {
        for bad in ["", "12a", "12", "12345"] {
            let mut c = card();
            c.cvv = bad.to_string();
            assert!(c.validate().is_err(), "cvv {bad:?} should be rejected");
        }
    }

    #[test]
    fn test_secret_type_mapping() {
        assert_eq!(
            SecretData::Card(card()).secret_type(),
            SecretType::Card
        );
        assert_eq!(
            SecretData::Text(TextData { content: "x".into() }).secret_type(),
            SecretType::Text
        );
    }
}
