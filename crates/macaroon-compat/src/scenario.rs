//! Abstract macaroon descriptions, built the same way in every package.

use crate::error::AdapterError;
use crate::interface::{Macaroon, Package};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caveat {
    FirstParty {
        condition: String,
    },
    ThirdParty {
        root_key: Vec<u8>,
        condition: String,
        location: String,
    },
}

impl Caveat {
    pub fn first(condition: &str) -> Self {
        Caveat::FirstParty {
            condition: condition.to_string(),
        }
    }

    pub fn third(root_key: &str, condition: &str, location: &str) -> Self {
        Caveat::ThirdParty {
            root_key: root_key.as_bytes().to_vec(),
            condition: condition.to_string(),
            location: location.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacaroonSpec {
    pub root_key: Vec<u8>,
    pub id: String,
    pub location: String,
    pub caveats: Vec<Caveat>,
}

impl MacaroonSpec {
    pub fn new(root_key: &str, id: &str) -> Self {
        Self {
            root_key: root_key.as_bytes().to_vec(),
            id: id.to_string(),
            location: String::new(),
            caveats: Vec::new(),
        }
    }

    pub fn at(mut self, location: &str) -> Self {
        self.location = location.to_string();
        self
    }

    pub fn with(mut self, caveat: Caveat) -> Self {
        self.caveats.push(caveat);
        self
    }
}

/// Constructs `spec` in `pkg`, adding caveats in order.
pub fn make_macaroon(
    pkg: &dyn Package,
    spec: &MacaroonSpec,
) -> Result<Box<dyn Macaroon>, AdapterError> {
    let mut m = pkg.new_macaroon(&spec.root_key, &spec.id, &spec.location)?;
    for cav in &spec.caveats {
        m = match cav {
            Caveat::FirstParty { condition } => m.with_first_party_caveat(condition)?,
            Caveat::ThirdParty {
                root_key,
                condition,
                location,
            } => m.with_third_party_caveat(root_key, condition, location)?,
        };
    }
    Ok(m)
}

/// Builds every spec and binds each discharge (all but the first) to the
/// primary. Returns the primary's root key with the macaroons.
pub fn make_macaroons(
    pkg: &dyn Package,
    specs: &[MacaroonSpec],
) -> Result<(Vec<u8>, Vec<Box<dyn Macaroon>>), AdapterError> {
    let Some(first) = specs.first() else {
        return Err(AdapterError::Construction(
            "a scenario needs at least one macaroon".to_string(),
        ));
    };
    let primary = make_macaroon(pkg, first)?;
    let mut out = Vec::with_capacity(specs.len());
    for spec in &specs[1..] {
        let discharge = make_macaroon(pkg, spec)?;
        out.push(discharge.bind(primary.as_ref())?);
    }
    out.insert(0, primary);
    Ok((first.root_key.clone(), out))
}
