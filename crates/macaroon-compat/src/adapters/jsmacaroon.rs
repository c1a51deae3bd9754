//! The `macaroon` npm package on Node, with keys as sjcl bit arrays.

use std::any::Any;
use std::sync::Arc;

use macaroon_compat_bridge::codec::decode_base64_lenient;
use macaroon_compat_bridge::{Evaluator, SetupStep};

use crate::error::AdapterError;
use crate::interface::{Checker, Macaroon, Package};
use crate::remote::{same_kind, RemoteHandle, RemoteLibrary, Stage};

pub fn setup_steps() -> Vec<SetupStep> {
    vec![
        SetupStep::node_require("macaroon", "macaroon"),
        SetupStep::node_require("sjcl", "sjcl"),
    ]
}

#[derive(Debug)]
pub struct JsMacaroonPackage {
    lib: Arc<RemoteLibrary>,
}

impl JsMacaroonPackage {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self {
            lib: Arc::new(RemoteLibrary::new("jsmacaroon", "state.m", evaluator)),
        }
    }
}

impl Package for JsMacaroonPackage {
    fn new_macaroon(
        &self,
        root_key: &[u8],
        id: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let c = self.lib.codec();
        let expr = format!(
            "state.macaroon.newMacaroon({}, {}, {})",
            c.bytes(root_key),
            c.text(id),
            c.text(location)
        );
        let h = self.lib.bind_new(Stage::Construct, &expr)?;
        Ok(Box::new(JsMacaroon { h }))
    }

    fn unmarshal_json(&self, data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| AdapterError::Serialization(format!("macaroon JSON is not utf-8: {e}")))?;
        let expr = format!(
            "state.macaroon.import(JSON.parse({}))",
            self.lib.codec().text(text)
        );
        let h = self.lib.bind_new(Stage::Serialize, &expr)?;
        Ok(Box::new(JsMacaroon { h }))
    }

    fn unmarshal_binary(&self, _data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        Err(AdapterError::unsupported("binary unmarshal"))
    }
}

#[derive(Debug)]
pub struct JsMacaroon {
    h: RemoteHandle,
}

impl JsMacaroon {
    fn lib(&self) -> &Arc<RemoteLibrary> {
        self.h.library()
    }

    fn peer<'a>(&self, m: &'a dyn Macaroon) -> Result<&'a JsMacaroon, AdapterError> {
        same_kind(&self.h, m, |p: &JsMacaroon| &p.h)
    }

    /// Clones this macaroon and applies `mutate` (given the clone's name)
    /// to the clone only.
    fn derive(
        &self,
        stage: Stage,
        mutate: impl FnOnce(&str) -> String,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let h = self
            .lib()
            .bind_new(stage, &format!("{}.clone()", self.h.handle()))?;
        self.lib().call(stage, &mutate(h.handle().as_str()))?;
        Ok(Box::new(JsMacaroon { h }))
    }
}

impl Macaroon for JsMacaroon {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn marshal_json(&self) -> Result<Vec<u8>, AdapterError> {
        let expr = format!("JSON.stringify(state.macaroon.export({}))", self.h.handle());
        let text: String = self.lib().result(Stage::Serialize, &expr)?;
        Ok(text.into_bytes())
    }

    fn marshal_binary(&self) -> Result<Vec<u8>, AdapterError> {
        Err(AdapterError::unsupported("binary marshal"))
    }

    fn with_first_party_caveat(&self, condition: &str) -> Result<Box<dyn Macaroon>, AdapterError> {
        let cond = self.lib().codec().text(condition);
        self.derive(Stage::Caveat, |h| format!("{h}.addFirstPartyCaveat({cond})"))
    }

    fn with_third_party_caveat(
        &self,
        root_key: &[u8],
        condition: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        let c = self.lib().codec();
        let args = format!("{}, {}, {}", c.bytes(root_key), c.text(condition), c.text(location));
        self.derive(Stage::Caveat, |h| format!("{h}.addThirdPartyCaveat({args})"))
    }

    fn bind(&self, primary: &dyn Macaroon) -> Result<Box<dyn Macaroon>, AdapterError> {
        let primary = self.peer(primary)?;
        let sig = format!("{}.signature()", primary.h.handle());
        self.derive(Stage::Bind, |h| format!("{h}.bind({sig})"))
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
        let check = format!(
            "(function (table) {{ return function (cav) {{ \
             if (table[cav] === true) {{ return null; }} \
             return new Error(\"condition \" + JSON.stringify(cav) + \" not met\"); }}; }})({})",
            c.predicates(checker.table())
        );
        let expr = format!(
            "{}.verify({}, {}, {})",
            self.h.handle(),
            c.bytes(root_key),
            check,
            c.list(&names)
        );
        self.lib().call(Stage::Verify, &expr)
    }

    fn signature(&self) -> Result<Vec<u8>, AdapterError> {
        let expr = format!(
            "state.sjcl.codec.base64.fromBits({}.signature())",
            self.h.handle()
        );
        let b64: String = self.lib().result(Stage::Inspect, &expr)?;
        decode_base64_lenient(&b64).map_err(|e| self.lib().decode_error(&expr, e))
    }
}
