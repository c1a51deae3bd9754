//! libmacaroons Python bindings on Python 2 or 3.
//!
//! The bindings return a new object from every caveat call, so no copy is
//! needed to keep the receiver intact. Unused and reused discharges are
//! accepted by this library.

use std::any::Any;
use std::sync::Arc;

use base64::Engine as _;
use macaroon_compat_bridge::codec::decode_hex;
use macaroon_compat_bridge::{Evaluator, SetupStep};

use crate::error::AdapterError;
use crate::interface::{Checker, DischargePolicy, Macaroon, Package};
use crate::remote::{same_kind, RemoteHandle, RemoteLibrary, Stage};

const VERIFIER_DEF: &str = "
global libmacaroons_bool_verifier
def libmacaroons_bool_verifier(conds):
    v = macaroons.Verifier()
    v.satisfy_general(lambda cond: conds.get(mcompat_text(cond), False))
    return v
";

pub fn setup_steps() -> Vec<SetupStep> {
    vec![
        SetupStep::python_import("macaroons"),
        SetupStep::new("define libmacaroons_bool_verifier", VERIFIER_DEF),
    ]
}

#[derive(Debug)]
pub struct LibMacaroonsPackage {
    lib: Arc<RemoteLibrary>,
}

impl LibMacaroonsPackage {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self {
            lib: Arc::new(RemoteLibrary::new("libmacaroons", "m", evaluator)),
        }
    }
}

impl Package for LibMacaroonsPackage {
    fn discharge_policy(&self) -> DischargePolicy {
        DischargePolicy::Lenient
    }

    fn new_macaroon(
        &self,
        root_key: &[u8],
        id: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let c = self.lib.codec();
        let expr = format!(
            "macaroons.create({}, {}, {})",
            c.text(location),
            c.bytes(root_key),
            c.text(id)
        );
        let h = self.lib.bind_new(Stage::Construct, &expr)?;
        Ok(Box::new(LibMacaroon { h }))
    }

    /// The bindings detect the format themselves but expect the JSON text
    /// wrapped in base64.
    fn unmarshal_json(&self, data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        let wrapped = base64::engine::general_purpose::STANDARD.encode(data);
        let expr = format!("macaroons.deserialize({})", self.lib.codec().text(&wrapped));
        let h = self.lib.bind_new(Stage::Serialize, &expr)?;
        Ok(Box::new(LibMacaroon { h }))
    }

    fn unmarshal_binary(&self, _data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        Err(AdapterError::unsupported("binary unmarshal"))
    }
}

#[derive(Debug)]
pub struct LibMacaroon {
    h: RemoteHandle,
}

impl LibMacaroon {
    fn lib(&self) -> &Arc<RemoteLibrary> {
        self.h.library()
    }

    fn peer<'a>(&self, m: &'a dyn Macaroon) -> Result<&'a LibMacaroon, AdapterError> {
        same_kind(&self.h, m, |p: &LibMacaroon| &p.h)
    }

    fn derive(&self, stage: Stage, expr: &str) -> Result<Box<dyn Macaroon>, AdapterError> {
        let h = self.lib().bind_new(stage, expr)?;
        Ok(Box::new(LibMacaroon { h }))
    }
}

impl Macaroon for LibMacaroon {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn marshal_json(&self) -> Result<Vec<u8>, AdapterError> {
        let expr = format!("mcompat_text({}.serialize(format='2j'))", self.h.handle());
        let text: String = self.lib().result(Stage::Serialize, &expr)?;
        Ok(text.into_bytes())
    }

    fn marshal_binary(&self) -> Result<Vec<u8>, AdapterError> {
        Err(AdapterError::unsupported("binary marshal"))
    }

    fn with_first_party_caveat(&self, condition: &str) -> Result<Box<dyn Macaroon>, AdapterError> {
        let expr = format!(
            "{}.add_first_party_caveat({})",
            self.h.handle(),
            self.lib().codec().text(condition)
        );
        self.derive(Stage::Caveat, &expr)
    }

    // The bindings draw their own nonce; NonceSource does not apply.
    fn with_third_party_caveat(
        &self,
        root_key: &[u8],
        condition: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let c = self.lib().codec();
        let expr = format!(
            "{}.add_third_party_caveat({}, {}, {})",
            self.h.handle(),
            c.text(location),
            c.bytes(root_key),
            c.text(condition)
        );
        self.derive(Stage::Caveat, &expr)
    }

    fn bind(&self, primary: &dyn Macaroon) -> Result<Box<dyn Macaroon>, AdapterError> {
        let primary = self.peer(primary)?;
        let expr = format!(
            "{}.prepare_for_request({})",
            primary.h.handle(),
            self.h.handle()
        );
        self.derive(Stage::Bind, &expr)
    }

    fn verify(
        &self,
        root_key: &[u8],
        checker: &Checker,
        discharges: &[Box<dyn Macaroon>],
    ) -> Result<(), AdapterError> {
        let names = discharges
            .iter()
            .map(|d| {
                self.peer(d.as_ref())
                    .map(|d| d.h.handle().to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let c = self.lib().codec();
        let expr = format!(
            "bool(libmacaroons_bool_verifier({}).verify({}, {}, {}))",
            c.predicates(checker.table()),
            self.h.handle(),
            c.bytes(root_key),
            c.list(&names)
        );
        match self.lib().result::<bool>(Stage::Verify, &expr)? {
            true => Ok(()),
            false => Err(AdapterError::verification("verifier returned false")),
        }
    }

    fn signature(&self) -> Result<Vec<u8>, AdapterError> {
        let expr = format!("mcompat_text({}.signature)", self.h.handle());
        let hex: String = self.lib().result(Stage::Inspect, &expr)?;
        decode_hex(&hex).map_err(|e| self.lib().decode_error(&expr, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{python_evaluator, Script};
    use serde_json::json;

    #[test]
    fn caveats_return_new_objects() {
        let script = Script::null();
        let pkg = LibMacaroonsPackage::new(python_evaluator(&script));
        let m = pkg
            .new_macaroon(b"root-key", "we used our secret key", "http://mybank")
            .expect("construct");
        m.with_first_party_caveat("account = 3735928559")
            .expect("caveat");
        m.with_third_party_caveat(b"k", "bob-is-great", "bob")
            .expect("third party");
        assert_eq!(
            script.sent(),
            vec![
                "m0 = macaroons.create(u\"http://mybank\", base64.b64decode(\"cm9vdC1rZXk=\"), u\"we used our secret key\")",
                "m1 = m0.add_first_party_caveat(u\"account = 3735928559\")",
                "m2 = m0.add_third_party_caveat(u\"bob\", base64.b64decode(\"aw==\"), u\"bob-is-great\")",
            ]
        );
        assert_eq!(pkg.discharge_policy(), DischargePolicy::Lenient);
    }

    #[test]
    fn json_goes_through_format_2j_and_base64() {
        let script = Script::new(|expr| {
            if expr.contains("serialize(format='2j')") {
                Ok(json!("{\"v\":2,\"i\":\"id\",\"s64\":\"AA\"}"))
            } else {
                Ok(json!(null))
            }
        });
        let pkg = LibMacaroonsPackage::new(python_evaluator(&script));
        let m = pkg.new_macaroon(b"k", "id", "").expect("construct");
        let data = m.marshal_json().expect("marshal");
        pkg.unmarshal_json(&data).expect("unmarshal");
        let sent = script.sent();
        assert_eq!(sent[1], "result = mcompat_text(m0.serialize(format='2j'))");
        assert_eq!(
            sent[2],
            "m1 = macaroons.deserialize(u\"eyJ2IjoyLCJpIjoiaWQiLCJzNjQiOiJBQSJ9\")"
        );
    }

    #[test]
    fn verifier_false_is_a_verification_failure() {
        let script = Script::new(|expr| {
            if expr.contains(".verify(") {
                Ok(json!(false))
            } else {
                Ok(json!(null))
            }
        });
        let pkg = LibMacaroonsPackage::new(python_evaluator(&script));
        let m = pkg.new_macaroon(b"k", "id", "").expect("construct");
        let err = m.verify(b"k", &Checker::new(), &[]).expect_err("false");
        assert!(matches!(err, AdapterError::Verification { .. }), "{err:?}");
    }

    #[test]
    fn foreign_macaroons_cannot_be_bound() {
        let script = Script::null();
        let a = LibMacaroonsPackage::new(python_evaluator(&script));
        let other = Script::null();
        let b = LibMacaroonsPackage::new(python_evaluator(&other));
        let primary = a.new_macaroon(b"k", "p", "").expect("primary");
        let discharge = b.new_macaroon(b"k", "d", "").expect("discharge");
        let err = discharge.bind(primary.as_ref()).expect_err("different runtime");
        assert!(matches!(err, AdapterError::ForeignMacaroon(_)), "{err:?}");
        assert!(err.is_harness());
    }

    #[test]
    fn foreign_discharges_are_not_a_verdict() {
        let script = Script::null();
        let a = LibMacaroonsPackage::new(python_evaluator(&script));
        let other = Script::null();
        let b = LibMacaroonsPackage::new(python_evaluator(&other));
        let primary = a.new_macaroon(b"k", "p", "").expect("primary");
        let discharge = b.new_macaroon(b"k", "d", "").expect("discharge");
        let err = primary
            .verify(b"k", &Checker::new(), &[discharge])
            .expect_err("different runtime");
        assert!(matches!(err, AdapterError::ForeignMacaroon(_)), "{err:?}");
        assert_eq!(err.verify_class(), None);
    }
}
