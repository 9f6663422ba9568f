use crate::bank::{BankProfile, Command, Field};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::ns;
use crate::params::{ApplicationRequest, SigningParameters};
use crate::security::{self, iso_time};
use crate::tree::{Document, NodePath};
use chrono::{DateTime, Utc};
use rand::RngCore;

pub const USER_AGENT: &str = concat!("rust-sepafm ", env!("CARGO_PKG_VERSION"));

const REQUEST_ID_BYTES: usize = 17;

/// Random hex request id, 34 characters.
pub fn request_id<R: RngCore + ?Sized>(rng: &mut R) -> String {
    let mut bytes = [0u8; REQUEST_ID_BYTES];
    rng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Builds complete request envelopes for one bank profile.
pub struct EnvelopeAssembler<'a> {
    profile: &'a dyn BankProfile,
}

impl<'a> EnvelopeAssembler<'a> {
    pub fn new(profile: &'a dyn BankProfile) -> Self {
        EnvelopeAssembler { profile }
    }

    /// Builds and serializes an envelope using the thread RNG and the current time.
    pub fn build(&self, params: &SigningParameters, request: &dyn ApplicationRequest) -> Result<String> {
        let mut rng = rand::rng();
        self.build_with(params, request, &mut rng, Utc::now())?.to_xml()
    }

    /// Standard commands get their body filled in, moved under the header
    /// template and signed. Certificate service commands return the filled
    /// body template as is, without a security header.
    pub fn build_with<R: RngCore + ?Sized>(
        &self,
        params: &SigningParameters,
        request: &dyn ApplicationRequest,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> Result<Document> {
        let command = params.command;
        self.profile.ensure_supported(command)?;

        let mut body_document = Document::load(&self.profile.body_template_path(command))?;
        let request_id = request_id(rng);
        let timestamp = iso_time(now);
        let application_request = request.to_base64();

        if command.is_certificate_command() {
            self.fill(
                &mut body_document,
                command,
                &[
                    (Field::SenderId, params.customer_id.as_str()),
                    (Field::RequestId, request_id.as_str()),
                    (Field::Timestamp, timestamp.as_str()),
                    (Field::ApplicationRequest, application_request.as_str()),
                ],
            )?;
            log::debug!("built unsigned {} request {} for {}", command, request_id, self.profile.bank());
            return Ok(body_document);
        }

        let credentials = params
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Signing(format!("{} requires signing credentials", command)))?;

        self.fill(
            &mut body_document,
            command,
            &[
                (Field::SenderId, params.customer_id.as_str()),
                (Field::RequestId, request_id.as_str()),
                (Field::Timestamp, timestamp.as_str()),
                (Field::Language, params.language.as_str()),
                (Field::UserAgent, USER_AGENT),
                (Field::ReceiverId, self.profile.receiver_id()),
                (Field::ApplicationRequest, application_request.as_str()),
            ],
        )?;

        let mut envelope = Document::load(&self.profile.header_template_path())?;
        let body_path = body_document.require(ns::SOAP_ENV, "Body")?;
        let body = body_document.detach(&body_path)?;
        envelope.append_child(&NodePath::root(), body)?;

        let signed = security::compose(envelope, params.digest_method, credentials, rng, now)?;
        log::debug!(
            "built signed {} request {} for {} ({})",
            command,
            request_id,
            self.profile.bank(),
            params.digest_method
        );
        Ok(signed)
    }

    fn fill(&self, document: &mut Document, command: Command, fields: &[(Field, &str)]) -> Result<()> {
        for (field, value) in fields {
            let path = document.require(self.profile.namespace_for(command, *field), field.local_name())?;
            document.set_text(&path, value)?;
        }
        Ok(())
    }
}

/// Builds a request with the built-in profile for `params.bank`, reading
/// templates from the configured directory.
pub fn build_request(
    config: &ClientConfig,
    params: &SigningParameters,
    request: &dyn ApplicationRequest,
) -> Result<String> {
    let profile = crate::bank::profile_for(params.bank, config.templates_dir.clone());
    EnvelopeAssembler::new(profile.as_ref()).build(params, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::{Bank, Danske, Nordea, Op};
    use crate::digest::{self, DigestMethod};
    use crate::params::{Credentials, Environment, RawApplicationRequest};
    use chrono::TimeZone;
    use rand::SeedableRng;

    const KEY: &str = include_str!("../testdata/signing_key.pem");
    const CERT: &str = include_str!("../testdata/signing_cert.pem");

    fn credentials() -> Credentials {
        Credentials::from_pem(KEY.as_bytes(), CERT.as_bytes()).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap()
    }

    fn request() -> RawApplicationRequest {
        RawApplicationRequest(b"<ApplicationRequest xmlns=\"http://bxd.fi/xmldata/\"/>".to_vec())
    }

    fn nordea_params() -> SigningParameters {
        SigningParameters::new(Bank::Nordea, Command::DownloadFileList, "11111111")
            .environment(Environment::Test)
            .digest_method(DigestMethod::Sha1)
            .credentials(credentials())
    }

    fn text_of(document: &Document, namespace: &str, local_name: &str) -> String {
        document.text(&document.require(namespace, local_name).unwrap()).unwrap()
    }

    #[test]
    fn nordea_download_file_list_end_to_end() {
        let _ = pretty_env_logger::try_init();

        let profile = Nordea::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        let built = EnvelopeAssembler::new(&profile)
            .build_with(&nordea_params(), &request(), &mut rng, now())
            .unwrap();
        let xml = built.to_xml().unwrap();
        assert!(xml.starts_with("<?xml"));

        // everything below works from the serialized form, as the bank would
        let document = Document::parse(&xml).unwrap();

        let token = base64::decode(text_of(&document, ns::WSSE, "BinarySecurityToken")).unwrap();
        let certificate = openssl::x509::X509::from_der(&token).unwrap();
        let public_key = certificate.public_key().unwrap();

        let signed_info = document.require(ns::DSIG, "SignedInfo").unwrap();
        let canonical = crate::c14n::canonicalize(&document.events(&signed_info).unwrap()).unwrap();
        let signature = base64::decode(text_of(&document, ns::DSIG, "SignatureValue")).unwrap();
        let mut verifier =
            openssl::sign::Verifier::new(openssl::hash::MessageDigest::sha1(), &public_key).unwrap();
        assert!(verifier.verify_oneshot(&signature, canonical.as_bytes()).unwrap());

        let digest_values = document
            .find_all(ns::DSIG, "DigestValue")
            .iter()
            .map(|p| document.text(p).unwrap())
            .collect::<Vec<_>>();
        let timestamp = document.require(ns::WSU, "Timestamp").unwrap();
        let body = document.require(ns::SOAP_ENV, "Body").unwrap();
        assert_eq!(
            digest_values,
            vec![
                base64::encode(digest::digest(&document, &timestamp, DigestMethod::Sha1).unwrap()),
                base64::encode(digest::digest(&document, &body, DigestMethod::Sha1).unwrap()),
            ]
        );

        let report = crate::verify::verify_envelope(&document).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.references.len(), 2);
        assert_ne!(report.references[0], report.references[1]);
    }

    #[test]
    fn body_fields_are_populated() {
        let profile = Nordea::default();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let document = EnvelopeAssembler::new(&profile)
            .build_with(&nordea_params().language("FI"), &request(), &mut rng, now())
            .unwrap();

        assert_eq!(text_of(&document, ns::BXD_MODEL, "SenderId"), "11111111");
        assert_eq!(text_of(&document, ns::BXD_MODEL, "ReceiverId"), "NDEAFIHH");
        assert_eq!(text_of(&document, ns::BXD_MODEL, "Language"), "FI");
        assert_eq!(text_of(&document, ns::BXD_MODEL, "UserAgent"), USER_AGENT);
        assert_eq!(text_of(&document, ns::BXD_MODEL, "Timestamp"), "2024-05-02T10:00:00Z");
        assert_eq!(text_of(&document, ns::BXD_MODEL, "ApplicationRequest"), request().to_base64());

        let request_id = text_of(&document, ns::BXD_MODEL, "RequestId");
        assert_eq!(request_id.len(), 34);
        assert!(request_id.chars().all(|c| c.is_ascii_hexdigit()));

        // body of the template envelope was moved, its empty header was not
        assert_eq!(document.find_all(ns::SOAP_ENV, "Body").len(), 1);
        assert_eq!(document.find_all(ns::SOAP_ENV, "Header").len(), 1);
        assert!(document.find(ns::WSSE, "Security").is_some());
    }

    #[test]
    fn request_ids_differ_between_builds() {
        let profile = Danske::default();
        let assembler = EnvelopeAssembler::new(&profile);
        let params = SigningParameters::new(Bank::Danske, Command::UploadFile, "11111111").credentials(credentials());
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let first = assembler.build_with(&params, &request(), &mut rng, now()).unwrap();
        let second = assembler.build_with(&params, &request(), &mut rng, now()).unwrap();
        assert_ne!(
            text_of(&first, ns::BXD_MODEL, "RequestId"),
            text_of(&second, ns::BXD_MODEL, "RequestId")
        );
        assert_eq!(text_of(&first, ns::BXD_MODEL, "ReceiverId"), "DABAFIHH");
    }

    #[test]
    fn certificate_command_is_unsigned() {
        let profile = Nordea::default();
        let params = SigningParameters::new(Bank::Nordea, Command::GetCertificate, "11111111");
        let mut rng = rand::rngs::StdRng::seed_from_u64(2);
        let document = EnvelopeAssembler::new(&profile)
            .build_with(&params, &request(), &mut rng, now())
            .unwrap();

        assert!(document.find(ns::WSSE, "Security").is_none());
        assert!(document.find(ns::DSIG, "Signature").is_none());
        assert_eq!(text_of(&document, ns::BXD_CERTIFICATE, "SenderId"), "11111111");
        assert_eq!(text_of(&document, ns::BXD_CERTIFICATE, "ApplicationRequest"), request().to_base64());
        assert!(!document.to_xml().unwrap().contains("Signature"));
    }

    #[test]
    fn op_certificate_command_uses_op_namespace() {
        let profile = Op::default();
        let params = SigningParameters::new(Bank::Op, Command::GetServiceCertificates, "11111111");
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let document = EnvelopeAssembler::new(&profile)
            .build_with(&params, &request(), &mut rng, now())
            .unwrap();
        assert_eq!(text_of(&document, ns::OP_CERTIFICATE, "SenderId"), "11111111");
        assert!(document.find(ns::WSSE, "Security").is_none());
    }

    #[test]
    fn standard_command_requires_credentials() {
        let profile = Nordea::default();
        let params = SigningParameters::new(Bank::Nordea, Command::DownloadFile, "11111111");
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let err = EnvelopeAssembler::new(&profile)
            .build_with(&params, &request(), &mut rng, now())
            .unwrap_err();
        assert!(matches!(err, Error::Signing(_)));
    }

    #[test]
    fn unsupported_command_is_rejected() {
        let profile = Danske::default();
        let params = SigningParameters::new(Bank::Danske, Command::GetCertificate, "11111111");
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let err = EnvelopeAssembler::new(&profile)
            .build_with(&params, &request(), &mut rng, now())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedCommand { .. }));
    }

    #[test]
    fn missing_templates_fail_to_load() {
        let profile = Nordea::new("/nonexistent/templates");
        let mut rng = rand::rngs::StdRng::seed_from_u64(6);
        let err = EnvelopeAssembler::new(&profile)
            .build_with(&nordea_params(), &request(), &mut rng, now())
            .unwrap_err();
        assert!(matches!(err, Error::TemplateLoad { .. }));
    }

    #[test]
    fn concurrent_builds_share_read_only_inputs() {
        let profile = Nordea::default();
        let params = nordea_params().digest_method(DigestMethod::Sha256);
        std::thread::scope(|scope| {
            let handles = (0..4)
                .map(|seed| {
                    let profile = &profile;
                    let params = &params;
                    scope.spawn(move || {
                        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
                        EnvelopeAssembler::new(profile)
                            .build_with(params, &request(), &mut rng, now())
                            .unwrap()
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                let document = handle.join().unwrap();
                assert!(crate::verify::verify_envelope(&document).unwrap().is_valid());
            }
        });
    }

    #[test]
    fn application_request_carries_the_exchange_parameters() {
        let profile = Nordea::default();
        let params = nordea_params().target_id("11111111A1").file_type("TITO");
        let request = crate::application::BxdApplicationRequest::from_parameters(&params, now());
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let document = EnvelopeAssembler::new(&profile)
            .build_with(&params, &request, &mut rng, now())
            .unwrap();

        let embedded = base64::decode(text_of(&document, ns::BXD_MODEL, "ApplicationRequest")).unwrap();
        let embedded = String::from_utf8(embedded).unwrap();
        assert!(embedded.contains("<Command>DownloadFileList</Command>"));
        assert!(embedded.contains("<TargetId>11111111A1</TargetId>"));
        assert!(embedded.contains("<FileType>TITO</FileType>"));
        assert!(embedded.contains("<Environment>TEST</Environment>"));
        assert!(crate::verify::verify_envelope(&document).unwrap().is_valid());
    }

    #[test]
    fn build_serializes_a_signed_envelope() {
        let profile = Nordea::default();
        let xml = EnvelopeAssembler::new(&profile).build(&nordea_params(), &request()).unwrap();
        assert!(crate::verify::verify_response(&xml).unwrap().is_valid());
    }
}
