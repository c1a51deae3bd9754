//! In-process macaroon package for exercising the oracle and suites
//! without any remote runtime. Signatures come from a keyed FNV-1a chain,
//! which is enough to tell macaroons apart; it is not a MAC.

use std::any::Any;

use base64::Engine as _;
use macaroon_compat_bridge::codec::{decode_base64_lenient, decode_hex, encode_hex};
use macaroon_compat_bridge::BridgeError;
use serde_json::{json, Value};

use crate::error::AdapterError;
use crate::interface::{Checker, DischargePolicy, Macaroon, Package};

fn chain(salt: u8, key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for b in std::iter::once(salt)
        .chain(key.iter().copied())
        .chain(std::iter::once(0xff))
        .chain(data.iter().copied())
    {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h.to_be_bytes().to_vec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FakeCaveat {
    cid: String,
    vid: Option<Vec<u8>>,
    cl: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct FakePackage {
    name: String,
    salt: u8,
    policy: DischargePolicy,
    broken: bool,
}

impl FakePackage {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            salt: 0,
            policy: DischargePolicy::Strict,
            broken: false,
        }
    }

    /// Produces signatures no other salt agrees with.
    pub(crate) fn with_salt(mut self, salt: u8) -> Self {
        self.salt = salt;
        self
    }

    pub(crate) fn lenient(mut self) -> Self {
        self.policy = DischargePolicy::Lenient;
        self
    }

    /// Every construction fails as if the runtime had gone away.
    pub(crate) fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

impl Package for FakePackage {
    fn discharge_policy(&self) -> DischargePolicy {
        self.policy
    }

    fn new_macaroon(
        &self,
        root_key: &[u8],
        id: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        if self.broken {
            return Err(AdapterError::Bridge(BridgeError::UnexpectedEof {
                runtime: self.name.clone(),
            }));
        }
        Ok(Box::new(FakeMacaroon {
            salt: self.salt,
            policy: self.policy,
            id: id.to_string(),
            location: location.to_string(),
            caveats: Vec::new(),
            sig: chain(self.salt, root_key, id.as_bytes()),
        }))
    }

    fn unmarshal_json(&self, data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        let bad = |e: String| AdapterError::Serialization(e);
        let v: Value = serde_json::from_slice(data).map_err(|e| bad(e.to_string()))?;
        let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
        let mut caveats = Vec::new();
        for c in v["caveats"].as_array().cloned().unwrap_or_default() {
            let vid = match text(&c, "vid") {
                Some(s) => Some(decode_base64_lenient(&s).map_err(|e| bad(e.to_string()))?),
                None => None,
            };
            caveats.push(FakeCaveat {
                cid: text(&c, "cid").ok_or_else(|| bad("caveat without cid".to_string()))?,
                vid,
                cl: text(&c, "cl"),
            });
        }
        Ok(Box::new(FakeMacaroon {
            salt: self.salt,
            policy: self.policy,
            id: text(&v, "identifier").ok_or_else(|| bad("missing identifier".to_string()))?,
            location: text(&v, "location").unwrap_or_default(),
            caveats,
            sig: decode_hex(&text(&v, "signature").unwrap_or_default()).map_err(bad)?,
        }))
    }

    fn unmarshal_binary(&self, _data: &[u8]) -> Result<Box<dyn Macaroon>, AdapterError> {
        Err(AdapterError::unsupported("binary unmarshal"))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeMacaroon {
    salt: u8,
    policy: DischargePolicy,
    id: String,
    location: String,
    caveats: Vec<FakeCaveat>,
    sig: Vec<u8>,
}

impl FakeMacaroon {
    fn derived(&self, caveat: FakeCaveat) -> Box<dyn Macaroon> {
        let mut data = caveat.vid.clone().unwrap_or_default();
        data.extend_from_slice(caveat.cid.as_bytes());
        let mut m = self.clone();
        m.sig = chain(self.salt, &self.sig, &data);
        m.caveats.push(caveat);
        Box::new(m)
    }

    fn check(
        &self,
        key: &[u8],
        checker: &Checker,
        discharges: &[&FakeMacaroon],
        bound_to: Option<&[u8]>,
        used: &mut [usize],
    ) -> Result<(), AdapterError> {
        let mut sig = chain(self.salt, key, self.id.as_bytes());
        for cav in &self.caveats {
            let mut data = Vec::new();
            match &cav.vid {
                None => checker
                    .check(&cav.cid)
                    .map_err(|e| AdapterError::verification(e))?,
                Some(cav_key) => {
                    let primary = bound_to.unwrap_or(self.sig.as_slice());
                    self.discharge(&cav.cid, cav_key, checker, discharges, primary, used)?;
                    data.extend_from_slice(cav_key);
                }
            }
            data.extend_from_slice(cav.cid.as_bytes());
            sig = chain(self.salt, &sig, &data);
        }
        if let Some(primary) = bound_to {
            sig = chain(self.salt, primary, &sig);
        }
        if sig != self.sig {
            return Err(AdapterError::verification(
                "signature mismatch after caveat verification",
            ));
        }
        Ok(())
    }
}

impl FakeMacaroon {
    /// Strict packages take the first discharge with a matching id and use
    /// each at most once; lenient ones try every match and allow reuse.
    fn discharge(
        &self,
        cid: &str,
        cav_key: &[u8],
        checker: &Checker,
        discharges: &[&FakeMacaroon],
        primary: &[u8],
        used: &mut [usize],
    ) -> Result<(), AdapterError> {
        let strict = self.policy == DischargePolicy::Strict;
        let mut candidates = discharges.iter().enumerate().filter(|(_, d)| d.id == cid);
        let candidates: Vec<usize> = if strict {
            candidates.next().map(|(i, _)| i).into_iter().collect()
        } else {
            candidates.map(|(i, _)| i).collect()
        };
        if candidates.is_empty() {
            return Err(AdapterError::verification(format!(
                "cannot find discharge macaroon for caveat {cid:?}"
            )));
        }
        let limit = if strict { 1 } else { discharges.len() };
        let mut last = None;
        for i in candidates {
            if used[i] >= limit {
                last = Some(AdapterError::verification(format!(
                    "discharge macaroon {cid:?} was used more than once"
                )));
                continue;
            }
            let mut attempt = used.to_vec();
            attempt[i] += 1;
            match discharges[i].check(cav_key, checker, discharges, Some(primary), &mut attempt) {
                Ok(()) => {
                    used.copy_from_slice(&attempt);
                    return Ok(());
                }
                Err(e) => last = Some(e),
            }
        }
        Err(last.unwrap_or_else(|| AdapterError::verification("no usable discharge")))
    }
}

impl Macaroon for FakeMacaroon {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn marshal_json(&self) -> Result<Vec<u8>, AdapterError> {
        let b64 = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let caveats: Vec<Value> = self
            .caveats
            .iter()
            .map(|c| match (&c.vid, &c.cl) {
                (Some(vid), Some(cl)) => json!({"cid": c.cid, "vid": b64.encode(vid), "cl": cl}),
                _ => json!({"cid": c.cid}),
            })
            .collect();
        let doc = json!({
            "caveats": caveats,
            "location": self.location,
            "identifier": self.id,
            "signature": encode_hex(&self.sig),
        });
        serde_json::to_vec(&doc).map_err(|e| AdapterError::Serialization(e.to_string()))
    }

    fn marshal_binary(&self) -> Result<Vec<u8>, AdapterError> {
        Err(AdapterError::unsupported("binary marshal"))
    }

    fn with_first_party_caveat(&self, condition: &str) -> Result<Box<dyn Macaroon>, AdapterError> {
        Ok(self.derived(FakeCaveat {
            cid: condition.to_string(),
            vid: None,
            cl: None,
        }))
    }

    fn with_third_party_caveat(
        &self,
        root_key: &[u8],
        condition: &str,
        location: &str,
    ) -> Result<Box<dyn Macaroon>, AdapterError> {
        Ok(self.derived(FakeCaveat {
            cid: condition.to_string(),
            vid: Some(root_key.to_vec()),
            cl: Some(location.to_string()),
        }))
    }

    fn bind(&self, primary: &dyn Macaroon) -> Result<Box<dyn Macaroon>, AdapterError> {
        let Some(primary) = primary.as_any().downcast_ref::<FakeMacaroon>() else {
            return Err(AdapterError::ForeignMacaroon(format!(
                "{primary:?} is not a fake macaroon"
            )));
        };
        let mut m = self.clone();
        m.sig = chain(self.salt, &primary.sig, &self.sig);
        Ok(Box::new(m))
    }

    fn verify(
        &self,
        root_key: &[u8],
        checker: &Checker,
        discharges: &[Box<dyn Macaroon>],
    ) -> Result<(), AdapterError> {
        let mut ds = Vec::with_capacity(discharges.len());
        for d in discharges {
            match d.as_any().downcast_ref::<FakeMacaroon>() {
                Some(d) => ds.push(d),
                None => {
                    return Err(AdapterError::ForeignMacaroon(format!(
                        "{d:?} is not a fake macaroon"
                    )))
                }
            }
        }
        let mut used = vec![0; ds.len()];
        self.check(root_key, checker, &ds, None, &mut used)?;
        if self.policy == DischargePolicy::Strict {
            if let Some(i) = used.iter().position(|&n| n == 0) {
                return Err(AdapterError::verification(format!(
                    "discharge macaroon {:?} was not used",
                    ds[i].id
                )));
            }
        }
        Ok(())
    }

    fn signature(&self) -> Result<Vec<u8>, AdapterError> {
        Ok(self.sig.clone())
    }
}
