//! Unsigned `bxd.fi` application requests built from the exchange parameters.

use crate::bank::Command;
use crate::params::{ApplicationRequest, Environment, SigningParameters};
use crate::security::iso_time;
use chrono::{DateTime, Utc};
use xml::escape::escape_str_pcdata;

#[derive(Debug, Clone)]
pub struct BxdApplicationRequest {
    customer_id: String,
    command: Command,
    timestamp: DateTime<Utc>,
    environment: Environment,
    target_id: Option<String>,
    file_reference: Option<String>,
    file_type: Option<String>,
    content: Option<Vec<u8>>,
}

impl BxdApplicationRequest {
    pub fn from_parameters(params: &SigningParameters, now: DateTime<Utc>) -> Self {
        BxdApplicationRequest {
            customer_id: params.customer_id.clone(),
            command: params.command,
            timestamp: now,
            environment: params.environment,
            target_id: params.target_id.clone(),
            file_reference: params.file_reference.clone(),
            file_type: params.file_type.clone(),
            content: None,
        }
    }

    /// File content for `upload_file`, base64 encoded into `Content`.
    pub fn content(mut self, content: &[u8]) -> Self {
        self.content = Some(content.to_vec());
        self
    }

    pub fn to_xml(&self) -> String {
        let environment = match self.environment {
            Environment::Test => "TEST",
            Environment::Production => "PRODUCTION",
        };

        let mut body = String::new();
        push_field(&mut body, "CustomerId", &self.customer_id);
        push_field(&mut body, "Command", self.command.request_name());
        push_field(&mut body, "Timestamp", &iso_time(self.timestamp));
        push_field(&mut body, "Environment", environment);
        if let Some(file_reference) = &self.file_reference {
            body.push_str("<FileReferences>");
            push_field(&mut body, "FileReference", file_reference);
            body.push_str("</FileReferences>");
        }
        if let Some(target_id) = &self.target_id {
            push_field(&mut body, "TargetId", target_id);
        }
        push_field(&mut body, "SoftwareId", crate::envelope::USER_AGENT);
        if let Some(file_type) = &self.file_type {
            push_field(&mut body, "FileType", file_type);
        }
        if let Some(content) = &self.content {
            push_field(&mut body, "Content", &base64::encode(content));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><ApplicationRequest xmlns="{}">{}</ApplicationRequest>"#,
            crate::ns::BXD_XMLDATA,
            body
        )
    }
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!("<{0}>{1}</{0}>", name, escape_str_pcdata(value)));
}

impl ApplicationRequest for BxdApplicationRequest {
    fn to_base64(&self) -> String {
        base64::encode(self.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::Bank;
    use crate::tree::Document;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()
    }

    fn text(document: &Document, local_name: &str) -> Option<String> {
        document
            .find(crate::ns::BXD_XMLDATA, local_name)
            .and_then(|p| document.text(&p))
    }

    #[test]
    fn parameters_flow_into_the_request() {
        let params = SigningParameters::new(Bank::Nordea, Command::DownloadFile, "11111111")
            .environment(Environment::Production)
            .target_id("11111111A1")
            .file_reference("ref & 1")
            .file_type("TITO");
        let document = Document::parse(&BxdApplicationRequest::from_parameters(&params, now()).to_xml()).unwrap();

        assert_eq!(text(&document, "CustomerId").unwrap(), "11111111");
        assert_eq!(text(&document, "Command").unwrap(), "DownloadFile");
        assert_eq!(text(&document, "Timestamp").unwrap(), "2024-05-02T10:00:00Z");
        assert_eq!(text(&document, "Environment").unwrap(), "PRODUCTION");
        assert_eq!(text(&document, "TargetId").unwrap(), "11111111A1");
        assert_eq!(text(&document, "FileReference").unwrap(), "ref & 1");
        assert_eq!(text(&document, "FileType").unwrap(), "TITO");
        assert_eq!(text(&document, "SoftwareId").unwrap(), crate::envelope::USER_AGENT);
        assert!(text(&document, "Content").is_none());
    }

    #[test]
    fn optional_fields_are_left_out() {
        let params = SigningParameters::new(Bank::Danske, Command::UploadFile, "11111111");
        let request = BxdApplicationRequest::from_parameters(&params, now()).content(b"payment");
        let document = Document::parse(&request.to_xml()).unwrap();

        assert_eq!(text(&document, "Environment").unwrap(), "TEST");
        assert!(text(&document, "TargetId").is_none());
        assert!(document.find(crate::ns::BXD_XMLDATA, "FileReferences").is_none());
        assert_eq!(text(&document, "Content").unwrap(), base64::encode("payment"));
        assert_eq!(
            base64::decode(request.to_base64()).unwrap(),
            request.to_xml().into_bytes()
        );
    }
}
