//! pymacaroons on Python 2 or 3.

use std::any::Any;
use std::sync::Arc;

use macaroon_compat_bridge::codec::decode_hex;
use macaroon_compat_bridge::{Evaluator, SetupStep};

use crate::config::NonceSource;
use crate::error::AdapterError;
use crate::interface::{Checker, Macaroon, Package};
use crate::remote::{same_kind, RemoteHandle, RemoteLibrary, Stage};

const VERIFIER_DEF: &str = "
global pymacaroons_bool_verifier
def pymacaroons_bool_verifier(conds):
    v = pymacaroons.Verifier()
    v.satisfy_general(lambda cond: conds.get(mcompat_text(cond), False))
    return v
";

const JSON_SERIALIZER: &str = "pymacaroons.serializers.JsonSerializer()";

pub fn setup_steps() -> Vec<SetupStep> {
    vec![
        SetupStep::python_import("pymacaroons"),
        SetupStep::python_import("pymacaroons.serializers"),
        SetupStep::new("define pymacaroons_bool_verifier", VERIFIER_DEF),
    ]
}

#[derive(Debug)]
pub struct PyMacaroonsPackage {
    lib: Arc<RemoteLibrary>,
    nonce: NonceSource,
}

impl PyMacaroonsPackage {
    pub fn new(evaluator: Arc<Evaluator>, nonce: NonceSource) -> Self {
        Self {
            lib: Arc::new(RemoteLibrary::new("pymacaroons", "m", evaluator)),
            nonce,
        }
    }
}

impl Package for PyMacaroonsPackage {
    fn new_macaroon(
        &self,
        root_key: &[u8],
        id: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let c = self.lib.codec();
        let expr = format!(
            "pymacaroons.Macaroon(location={}, identifier={}, key={})",
            c.text(location),
            c.text(id),
            c.bytes(root_key)
        );
        let h = self.lib.bind_new(Stage::Construct, &expr)?;
        Ok(Box::new(PyMacaroon {
            h,
            nonce: self.nonce,
        }))
    }

    fn unmarshal_json(&self, data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| AdapterError::Serialization(format!("macaroon JSON is not utf-8: {e}")))?;
        let expr = format!(
            "pymacaroons.Macaroon.deserialize({}, serializer={JSON_SERIALIZER})",
            self.lib.codec().text(text)
        );
        let h = self.lib.bind_new(Stage::Serialize, &expr)?;
        Ok(Box::new(PyMacaroon {
            h,
            nonce: self.nonce,
        }))
    }

    fn unmarshal_binary(&self, _data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        Err(AdapterError::unsupported("binary unmarshal"))
    }
}

#[derive(Debug)]
pub struct PyMacaroon {
    h: RemoteHandle,
    nonce: NonceSource,
}

impl PyMacaroon {
    fn lib(&self) -> &Arc<RemoteLibrary> {
        self.h.library()
    }

    fn derive(&self, h: RemoteHandle) -> Box<dyn Macaroon> {
        Box::new(PyMacaroon {
            h,
            nonce: self.nonce,
        })
    }

    /// pymacaroons mutates in place, so every derivation starts from a copy.
    fn copy(&self, stage: Stage) -> Result<RemoteHandle, AdapterError> {
        self.lib()
            .bind_new(stage, &format!("{}.copy()", self.h.handle()))
    }

    fn peer<'a>(&self, m: &'a dyn Macaroon) -> Result<&'a PyMacaroon, AdapterError> {
        same_kind(&self.h, m, |p: &PyMacaroon| &p.h)
    }
}

impl Macaroon for PyMacaroon {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn marshal_json(&self) -> Result<Vec<u8>, AdapterError> {
        let expr = format!(
            "mcompat_text({}.serialize({JSON_SERIALIZER}))",
            self.h.handle()
        );
        let text: String = self.lib().result(Stage::Serialize, &expr)?;
        Ok(text.into_bytes())
    }

    fn marshal_binary(&self) -> Result<Vec<u8>, AdapterError> {
        Err(AdapterError::unsupported("binary marshal"))
    }

    fn with_first_party_caveat(&self, condition: &str) -> Result<Box<dyn Macaroon>, AdapterError> {
        let h = self.copy(Stage::Caveat)?;
        let expr = format!(
            "{}.add_first_party_caveat({})",
            h.handle(),
            self.lib().codec().text(condition)
        );
        self.lib().call(Stage::Caveat, &expr)?;
        Ok(self.derive(h))
    }

    fn with_third_party_caveat(
        &self,
        root_key: &[u8],
        condition: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let nonce = self.nonce.nonce()?;
        let h = self.copy(Stage::Caveat)?;
        let c = self.lib().codec();
        let expr = format!(
            "{}.add_third_party_caveat({}, {}, {}, nonce={})",
            h.handle(),
            c.text(location),
            c.bytes(root_key),
            c.text(condition),
            c.bytes(&nonce)
        );
        self.lib().call(Stage::Caveat, &expr)?;
        Ok(self.derive(h))
    }

    fn bind(&self, primary: &dyn Macaroon) -> Result<Box<dyn Macaroon>, AdapterError> {
        let primary = self.peer(primary)?;
        let expr = format!(
            "{}.prepare_for_request({})",
            primary.h.handle(),
            self.h.handle()
        );
        let h = self.lib().bind_new(Stage::Bind, &expr)?;
        Ok(self.derive(h))
    }

    fn verify(
        &self,
        root_key: &[u8],
        checker: &Checker,
        discharges: &[Box<dyn Macaroon>],
    ) -> Result<(), AdapterError> {
        let mut names = Vec::with_capacity(discharges.len());
        for d in discharges {
            let d = self.peer(d.as_ref())?;
            names.push(d.h.handle().to_string());
        }
        let c = self.lib().codec();
        let expr = format!(
            "bool(pymacaroons_bool_verifier({}).verify({}, {}, {}))",
            c.predicates(checker.table()),
            self.h.handle(),
            c.bytes(root_key),
            c.list(&names)
        );
        let ok: bool = self.lib().result(Stage::Verify, &expr)?;
        if ok {
            Ok(())
        } else {
            Err(AdapterError::verification("verifier returned false"))
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

    fn package(script: &Script) -> PyMacaroonsPackage {
        PyMacaroonsPackage::new(python_evaluator(script), NonceSource::Zero)
    }

    #[test]
    fn construct_and_branch_without_mutating_the_base() {
        let script = Script::null();
        let pkg = package(&script);
        let base = pkg
            .new_macaroon(b"root-key", "root-id", "")
            .expect("construct");
        base.with_first_party_caveat("wonderful").expect("caveat 1");
        base.with_first_party_caveat("splendid").expect("caveat 2");

        let sent = script.sent();
        assert_eq!(
            sent,
            vec![
                "m0 = pymacaroons.Macaroon(location=u\"\", identifier=u\"root-id\", key=base64.b64decode(\"cm9vdC1rZXk=\"))",
                "m1 = m0.copy()",
                "m1.add_first_party_caveat(u\"wonderful\")",
                "m2 = m0.copy()",
                "m2.add_first_party_caveat(u\"splendid\")",
            ]
        );
    }

    #[test]
    fn third_party_caveat_passes_explicit_zero_nonce() {
        let script = Script::null();
        let pkg = package(&script);
        let m = pkg.new_macaroon(b"k", "id", "loc").expect("construct");
        m.with_third_party_caveat(b"caveat-key", "bob-is-great", "bob")
            .expect("caveat");
        let last = script.sent().pop().expect("request");
        assert_eq!(
            last,
            "m1.add_third_party_caveat(u\"bob\", base64.b64decode(\"Y2F2ZWF0LWtleQ==\"), u\"bob-is-great\", nonce=base64.b64decode(\"AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA\"))"
        );
    }

    #[test]
    fn bind_prepares_discharge_on_primary() {
        let script = Script::null();
        let pkg = package(&script);
        let primary = pkg.new_macaroon(b"k", "p", "").expect("primary");
        let discharge = pkg.new_macaroon(b"k2", "d", "bob").expect("discharge");
        discharge.bind(primary.as_ref()).expect("bind");
        assert_eq!(
            script.sent().pop().as_deref(),
            Some("m2 = m0.prepare_for_request(m1)")
        );
    }

    #[test]
    fn verify_reports_library_verdicts() {
        let script = Script::new(|expr| {
            if expr.contains("verify(") && expr.contains("False") {
                Err(json!(
                    "Traceback (most recent call last):\nMacaroonUnmetCaveatException: Caveats not met\n"
                ))
            } else if expr.contains("verify(") {
                Ok(json!(true))
            } else {
                Ok(json!(null))
            }
        });
        let pkg = package(&script);
        let m = pkg.new_macaroon(b"k", "id", "").expect("construct");
        let d = pkg.new_macaroon(b"k2", "d", "").expect("discharge");
        let discharges = vec![d];

        m.verify(b"k", &Checker::new().allow("wonderful"), &discharges)
            .expect("verifies");
        assert_eq!(
            script.sent().pop().as_deref(),
            Some(
                "result = bool(pymacaroons_bool_verifier({u\"wonderful\": True}).verify(m0, base64.b64decode(\"aw==\"), [m1]))"
            )
        );

        let err = m
            .verify(b"k", &Checker::new().deny("wonderful"), &[])
            .expect_err("rejected");
        assert_eq!(
            err.verify_class(),
            Some(crate::error::VerifyErrorClass::ConditionNotMet)
        );
    }

    #[test]
    fn signature_is_hex_decoded_and_bad_hex_is_a_bridge_error() {
        let script = Script::new(|expr| {
            if expr.ends_with(".signature)") {
                Ok(json!("e3d9e029"))
            } else {
                Ok(json!(null))
            }
        });
        let pkg = package(&script);
        let m = pkg.new_macaroon(b"k", "id", "").expect("construct");
        assert_eq!(m.signature().expect("sig"), vec![0xe3, 0xd9, 0xe0, 0x29]);

        let script = Script::new(|expr| {
            if expr.ends_with(".signature)") {
                Ok(json!("not hex"))
            } else {
                Ok(json!(null))
            }
        });
        let m = package(&script)
            .new_macaroon(b"k", "id", "")
            .expect("construct");
        assert!(m.signature().expect_err("bad hex").is_bridge());
    }

    #[test]
    fn json_round_trip_and_binary_unsupported() {
        let script = Script::new(|expr| {
            if expr.contains(".serialize(") {
                Ok(json!("{\"identifier\": \"id\"}"))
            } else {
                Ok(json!(null))
            }
        });
        let pkg = package(&script);
        let m = pkg.new_macaroon(b"k", "id", "").expect("construct");
        let data = m.marshal_json().expect("marshal");
        assert_eq!(data, b"{\"identifier\": \"id\"}");
        pkg.unmarshal_json(&data).expect("unmarshal");
        assert_eq!(
            script.sent().pop().as_deref(),
            Some(
                "m1 = pymacaroons.Macaroon.deserialize(u\"{\\\"identifier\\\": \\\"id\\\"}\", serializer=pymacaroons.serializers.JsonSerializer())"
            )
        );

        assert!(matches!(m.marshal_binary(), Err(AdapterError::Serialization(_))));
        assert!(matches!(pkg.unmarshal_binary(b"x"), Err(AdapterError::Serialization(_))));
    }
}
