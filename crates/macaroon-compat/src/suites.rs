//! Built-in scenario suites.
//!
//! The signature and bind vectors are the libmacaroons README examples.
//! Verification cases exercise the discharge graph: missing, unused and
//! reused discharges, nested third parties and wrong caveat keys.

use std::fmt;
use std::str::FromStr;

use macaroon_compat_bridge::codec::encode_hex;
use serde_json::{json, Value};
use tracing::info;

use crate::canonical::normalize_json;
use crate::config::NonceSource;
use crate::error::{AdapterError, VerifyErrorClass};
use crate::interface::{Checker, DischargePolicy, Macaroon};
use crate::oracle::{check_consistency, ConsistencyReport, ImplementationOutcome, Mismatch, Outcome};
use crate::registry::{Implementation, Registry};
use crate::report::SuiteReport;
use crate::scenario::{make_macaroon, make_macaroons, Caveat, MacaroonSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuiteName {
    Signature,
    Bind,
    Verify,
    Serialization,
    Properties,
}

impl SuiteName {
    pub const ALL: [SuiteName; 5] = [
        SuiteName::Signature,
        SuiteName::Bind,
        SuiteName::Verify,
        SuiteName::Serialization,
        SuiteName::Properties,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SuiteName::Signature => "signature",
            SuiteName::Bind => "bind",
            SuiteName::Verify => "verify",
            SuiteName::Serialization => "serialization",
            SuiteName::Properties => "properties",
        }
    }
}

impl fmt::Display for SuiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuiteName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SuiteName::ALL
            .into_iter()
            .find(|n| n.as_str() == s.trim())
            .ok_or_else(|| {
                format!(
                    "unknown suite {s:?} (expected one of: {})",
                    SuiteName::ALL.map(SuiteName::as_str).join(", ")
                )
            })
    }
}

pub fn run_suite(suite: SuiteName, registry: &Registry, nonce: NonceSource) -> SuiteReport {
    info!(suite = %suite, implementations = registry.len(), "running suite");
    let report = match suite {
        SuiteName::Signature => signature_suite(registry, nonce),
        SuiteName::Bind => bind_suite(registry, nonce),
        SuiteName::Verify => verify_suite(registry),
        SuiteName::Serialization => serialization_suite(registry),
        SuiteName::Properties => properties_suite(registry),
    };
    info!(
        suite = %suite,
        cases = report.cases.len(),
        inconsistent = report.inconsistent_cases(),
        harness_errors = report.harness_errors(),
        "suite finished"
    );
    report
}

const BANK_KEY: &str = "this is our super secret key; only we should know it";
const BANK_ID: &str = "we used our secret key";
const OTHER_KEY: &str = "this is a different super-secret key; never use the same secret twice";
const OTHER_ID: &str = "we used our other secret key";
const BANK: &str = "http://mybank";
const DICE_KEY: &str = "4; guaranteed random by a fair toss of the dice";
const DICE_CONDITION: &str = "this was how we remind auth of key/pred";
const AUTH: &str = "http://auth.mybank/";

const ACCOUNT: &str = "account = 3735928559";
const BEFORE_2015: &str = "time < 2015-01-01T00:00";

fn has_third_party(spec: &MacaroonSpec) -> bool {
    spec.caveats
        .iter()
        .any(|c| matches!(c, Caveat::ThirdParty { .. }))
}

fn signature_hex(m: &dyn Macaroon) -> Result<Value, AdapterError> {
    Ok(json!(encode_hex(&m.signature()?)))
}

/// Rejects every outcome other than success with `want`.
fn expect_value(want: Value) -> impl FnMut(&ImplementationOutcome) -> Option<Mismatch> {
    move |o| match o.outcome.value() {
        Some(v) if v == &want => None,
        _ => Some(Mismatch {
            expected: format!("success ({want})"),
            actual: o.outcome.describe(),
        }),
    }
}

pub struct SignatureVector {
    pub about: &'static str,
    pub macaroon: MacaroonSpec,
    pub signature: &'static str,
}

pub fn signature_vectors() -> Vec<SignatureVector> {
    let bank = || MacaroonSpec::new(BANK_KEY, BANK_ID).at(BANK);
    let other = || MacaroonSpec::new(OTHER_KEY, OTHER_ID).at(BANK);
    vec![
        SignatureVector {
            about: "no caveats",
            macaroon: bank(),
            signature: "e3d9e02908526c4c0039ae15114115d97fdd68bf2ba379b342aaf0f617d0552f",
        },
        SignatureVector {
            about: "one caveat",
            macaroon: bank().with(Caveat::first(ACCOUNT)),
            signature: "1efe4763f290dbce0c1d08477367e11f4eee456a64933cf662d79772dbb82128",
        },
        SignatureVector {
            about: "two caveats",
            macaroon: bank()
                .with(Caveat::first(ACCOUNT))
                .with(Caveat::first(BEFORE_2015)),
            signature: "696665d0229f9f801b588bb3f68bbdb806b26d1fbcd40ca22d9017bce4a075f1",
        },
        SignatureVector {
            about: "three caveats",
            macaroon: bank()
                .with(Caveat::first(ACCOUNT))
                .with(Caveat::first(BEFORE_2015))
                .with(Caveat::first("email = alice@example.org")),
            signature: "882e6d59496ed5245edb7ab5b8839ecd63e5d504e54839804f164070d8eed952",
        },
        SignatureVector {
            about: "one caveat, second key",
            macaroon: other().with(Caveat::first(ACCOUNT)),
            signature: "1434e674ad84fdfdc9bc1aa00785325c8b6d57341fc7ce200ba4680c80786dda",
        },
        SignatureVector {
            about: "one third party caveat, second key",
            macaroon: other()
                .with(Caveat::first(ACCOUNT))
                .with(Caveat::third(DICE_KEY, DICE_CONDITION, AUTH)),
            signature: "d27db2fd1f22760e4c3dae8137e2d8fc1df6c0741c18aed4b97256bf78d1f55c",
        },
    ]
}

/// Third-party signatures depend on the caveat nonce; random nonces make
/// them incomparable.
fn nonce_dependent(nonce: NonceSource, specs: &[MacaroonSpec]) -> bool {
    nonce == NonceSource::Random && specs.iter().any(has_third_party)
}

fn signature_suite(registry: &Registry, nonce: NonceSource) -> SuiteReport {
    let mut suite = SuiteReport::new(SuiteName::Signature.as_str());
    for v in signature_vectors() {
        let case = format!("signature: {}", v.about);
        if nonce_dependent(nonce, std::slice::from_ref(&v.macaroon)) {
            suite.skipped.push(case);
            continue;
        }
        let mut report = check_consistency(registry, case, &[], |imp| {
            let m = make_macaroon(imp.package(), &v.macaroon)?;
            signature_hex(m.as_ref())
        });
        report.expect_each(expect_value(json!(v.signature)));
        suite.cases.push(report);
    }
    suite
}

pub const BIND_SIGNATURE: &str =
    "2eb01d0dd2b4475330739140188648cf25dda0425ea9f661f1574ca0a9eac54e";

pub fn bind_macaroons() -> Vec<MacaroonSpec> {
    vec![
        MacaroonSpec::new(OTHER_KEY, OTHER_ID)
            .at(BANK)
            .with(Caveat::first(ACCOUNT))
            .with(Caveat::third(DICE_KEY, DICE_CONDITION, AUTH)),
        MacaroonSpec::new(DICE_KEY, DICE_CONDITION).with(Caveat::first(BEFORE_2015)),
    ]
}

fn bind_suite(registry: &Registry, nonce: NonceSource) -> SuiteReport {
    let mut suite = SuiteReport::new(SuiteName::Bind.as_str());
    let specs = bind_macaroons();
    let case = "bind: discharge bound to primary".to_string();
    if nonce_dependent(nonce, &specs) {
        suite.skipped.push(case);
        return suite;
    }
    let mut report = check_consistency(registry, case, &[], |imp| {
        let (_, ms) = make_macaroons(imp.package(), &specs)?;
        signature_hex(ms[1].as_ref())
    });
    report.expect_each(expect_value(json!(BIND_SIGNATURE)));
    suite.cases.push(report);
    suite
}

pub struct ConditionCase {
    pub conditions: Checker,
    /// The error a strict implementation reports, if verification fails.
    pub expect_err: Option<&'static str>,
    /// The class strict implementations must report when they fail.
    pub expect_class: Option<VerifyErrorClass>,
    /// Lenient implementations accept this case even though strict ones
    /// reject it.
    pub lenient_ok: bool,
}

impl ConditionCase {
    fn ok(conditions: &[(&str, bool)]) -> Self {
        Self {
            conditions: conditions.iter().copied().collect(),
            expect_err: None,
            expect_class: None,
            lenient_ok: false,
        }
    }

    fn fails(conditions: &[(&str, bool)], err: &'static str) -> Self {
        Self {
            expect_err: Some(err),
            expect_class: Some(VerifyErrorClass::classify(err)),
            ..Self::ok(conditions)
        }
    }

    fn lenient(mut self) -> Self {
        self.lenient_ok = true;
        self
    }

    /// Whether `policy` is expected to reject this case.
    pub fn expects_failure(&self, policy: DischargePolicy) -> bool {
        self.expect_err.is_some() && !(self.lenient_ok && policy == DischargePolicy::Lenient)
    }
}

pub struct VerifyCase {
    pub about: &'static str,
    /// The primary first, then its discharges.
    pub macaroons: Vec<MacaroonSpec>,
    pub conditions: Vec<ConditionCase>,
}

fn primary() -> MacaroonSpec {
    MacaroonSpec::new("root-key", "root-id")
}

fn discharge(location: &str, id: &str) -> MacaroonSpec {
    MacaroonSpec::new(&format!("{location}-caveat-root-key"), id).at(location)
}

fn third(party: &str, condition: &str) -> Caveat {
    Caveat::third(&format!("{party}-caveat-root-key"), condition, party)
}

const NOT_FOUND_BOB: &str = r#"cannot find discharge macaroon for caveat "bob-is-great""#;
const UNUSED_BOB: &str = r#"discharge macaroon "bob-is-great" was not used"#;
const REUSED_BOB: &str = r#"discharge macaroon "bob-is-great" was used more than once"#;

pub fn recursive_third_party_macaroons() -> Vec<MacaroonSpec> {
    vec![
        primary()
            .with(Caveat::first("wonderful"))
            .with(third("bob", "bob-is-great"))
            .with(third("charlie", "charlie-is-great")),
        discharge("bob", "bob-is-great")
            .with(Caveat::first("splendid"))
            .with(third("barbara", "barbara-is-great")),
        discharge("charlie", "charlie-is-great")
            .with(Caveat::first("splendid"))
            .with(third("celine", "celine-is-great")),
        discharge("barbara", "barbara-is-great")
            .with(Caveat::first("spiffing"))
            .with(third("ben", "ben-is-great")),
        discharge("ben", "ben-is-great"),
        discharge("celine", "celine-is-great").with(Caveat::first("high-fiving")),
    ]
}

pub fn verify_cases() -> Vec<VerifyCase> {
    let bob_primary = || {
        primary()
            .with(Caveat::first("wonderful"))
            .with(third("bob", "bob-is-great"))
    };
    vec![
        VerifyCase {
            about: "single third party caveat without discharge",
            macaroons: vec![bob_primary()],
            conditions: vec![ConditionCase::fails(&[("wonderful", true)], NOT_FOUND_BOB)],
        },
        VerifyCase {
            about: "single third party caveat with discharge",
            macaroons: vec![bob_primary(), discharge("bob", "bob-is-great")],
            conditions: vec![
                ConditionCase::ok(&[("wonderful", true)]),
                ConditionCase::fails(&[("wonderful", false)], r#"condition "wonderful" not met"#),
            ],
        },
        VerifyCase {
            about: "single third party caveat with discharge with mismatching root key",
            macaroons: vec![
                bob_primary(),
                MacaroonSpec::new("bob-caveat-root-key-wrong", "bob-is-great").at("bob"),
            ],
            conditions: vec![ConditionCase::fails(
                &[("wonderful", true)],
                "signature mismatch after caveat verification",
            )],
        },
        VerifyCase {
            about: "single third party caveat with two discharges",
            macaroons: vec![
                bob_primary(),
                discharge("bob", "bob-is-great").with(Caveat::first("splendid")),
                discharge("bob", "bob-is-great").with(Caveat::first("top of the world")),
            ],
            conditions: vec![
                ConditionCase::fails(&[("wonderful", true)], r#"condition "splendid" not met"#),
                ConditionCase::fails(
                    &[("wonderful", true), ("splendid", true), ("top of the world", true)],
                    UNUSED_BOB,
                )
                .lenient(),
                ConditionCase::fails(
                    &[("wonderful", true), ("splendid", false), ("top of the world", true)],
                    r#"condition "splendid" not met"#,
                )
                .lenient(),
                ConditionCase::fails(
                    &[("wonderful", true), ("splendid", true), ("top of the world", false)],
                    UNUSED_BOB,
                ),
            ],
        },
        VerifyCase {
            about: "one discharge used for two macaroons",
            macaroons: vec![
                primary()
                    .with(Caveat::third("bob-caveat-root-key", "somewhere else", "bob"))
                    .with(Caveat::third("bob-caveat-root-key", "bob-is-great", "charlie")),
                discharge("bob", "somewhere else").with(Caveat::third(
                    "bob-caveat-root-key",
                    "bob-is-great",
                    "charlie",
                )),
                discharge("bob", "bob-is-great"),
            ],
            conditions: vec![ConditionCase::fails(&[], REUSED_BOB).lenient()],
        },
        VerifyCase {
            about: "recursive third party caveat",
            macaroons: vec![
                primary().with(third("bob", "bob-is-great")),
                discharge("bob", "bob-is-great").with(Caveat::third(
                    "bob-caveat-root-key",
                    "bob-is-great",
                    "charlie",
                )),
            ],
            conditions: vec![ConditionCase::fails(&[], REUSED_BOB)],
        },
        VerifyCase {
            about: "two third party caveats",
            macaroons: vec![
                bob_primary().with(third("charlie", "charlie-is-great")),
                discharge("bob", "bob-is-great").with(Caveat::first("splendid")),
                discharge("charlie", "charlie-is-great").with(Caveat::first("top of the world")),
            ],
            conditions: vec![
                ConditionCase::ok(&[
                    ("wonderful", true),
                    ("splendid", true),
                    ("top of the world", true),
                ]),
                ConditionCase::fails(
                    &[("wonderful", true), ("splendid", false), ("top of the world", true)],
                    r#"condition "splendid" not met"#,
                ),
                ConditionCase::fails(
                    &[("wonderful", true), ("splendid", true), ("top of the world", false)],
                    r#"condition "top of the world" not met"#,
                ),
            ],
        },
        VerifyCase {
            about: "third party caveat with undischarged third party caveat",
            macaroons: vec![
                bob_primary(),
                discharge("bob", "bob-is-great")
                    .with(Caveat::first("splendid"))
                    .with(third("barbara", "barbara-is-great")),
            ],
            conditions: vec![ConditionCase::fails(
                &[("wonderful", true), ("splendid", true)],
                r#"cannot find discharge macaroon for caveat "barbara-is-great""#,
            )],
        },
        VerifyCase {
            about: "recursive third party caveats",
            macaroons: recursive_third_party_macaroons(),
            conditions: vec![
                ConditionCase::ok(&[
                    ("wonderful", true),
                    ("splendid", true),
                    ("high-fiving", true),
                    ("spiffing", true),
                ]),
                ConditionCase::fails(
                    &[
                        ("wonderful", true),
                        ("splendid", true),
                        ("high-fiving", false),
                        ("spiffing", true),
                    ],
                    r#"condition "high-fiving" not met"#,
                ),
            ],
        },
        VerifyCase {
            about: "unused discharge",
            macaroons: vec![primary(), MacaroonSpec::new("other-key", "unused")],
            conditions: vec![ConditionCase::fails(
                &[],
                r#"discharge macaroon "unused" was not used"#,
            )
            .lenient()],
        },
    ]
}

/// Verifies one condition set. Lenient implementations are known exceptions
/// where the case allows them to succeed; every implementation is also held
/// to its own policy's expected outcome. Strict implementations that fail
/// must fail with the case's error class.
pub fn run_verify_case(
    registry: &Registry,
    case: &VerifyCase,
    index: usize,
    cond: &ConditionCase,
) -> ConsistencyReport {
    let known: Vec<&str> = if cond.lenient_ok {
        registry
            .entries()
            .iter()
            .filter(|e| e.discharge_policy() == DischargePolicy::Lenient)
            .map(Implementation::name)
            .collect()
    } else {
        Vec::new()
    };
    let title = format!("verify: {} [{index}]", case.about);
    let mut report = check_consistency(registry, title, &known, |imp| {
        let (root_key, ms) = make_macaroons(imp.package(), &case.macaroons)?;
        ms[0].verify(&root_key, &cond.conditions, &ms[1..])?;
        Ok(Value::Null)
    });
    report.expect_each(|o| {
        let want_failure = cond.expects_failure(o.discharge_policy);
        match (&o.outcome, want_failure) {
            (Outcome::Failed { error }, true) => {
                let want = cond.expect_class?;
                if o.discharge_policy != DischargePolicy::Strict || error.class == Some(want) {
                    return None;
                }
                Some(Mismatch {
                    expected: format!("failure of class {want}"),
                    actual: match error.class {
                        Some(class) => format!("failure of class {class} ({})", error.message),
                        None => o.outcome.describe(),
                    },
                })
            }
            (Outcome::Failed { .. }, false) | (Outcome::Ok { .. }, true) => Some(Mismatch {
                expected: match cond.expect_err {
                    Some(err) if want_failure => format!("failure ({err})"),
                    _ => "success".to_string(),
                },
                actual: o.outcome.describe(),
            }),
            _ => None,
        }
    });
    report
}

fn verify_suite(registry: &Registry) -> SuiteReport {
    let mut suite = SuiteReport::new(SuiteName::Verify.as_str());
    for case in verify_cases() {
        for (i, cond) in case.conditions.iter().enumerate() {
            suite.cases.push(run_verify_case(registry, &case, i, cond));
        }
    }
    suite
}

pub fn serialization_macaroons() -> Vec<(String, MacaroonSpec)> {
    let mut out = vec![
        (
            "vanilla macaroon".to_string(),
            primary()
                .with(Caveat::first("wonderful"))
                .with(third("bob", "bob-is-great")),
        ),
        (
            "macaroon with non-ascii text".to_string(),
            MacaroonSpec::new("root-key-♔", "root-γ-♔")
                .at("Москва")
                .with(Caveat::first("π > 3"))
                .with(Caveat::third("root-key-ζ", "∃χ: ∀ι∈χ: ι≠∅", "Αθήνα")),
        ),
    ];
    for case in verify_cases() {
        for (j, m) in case.macaroons.into_iter().enumerate() {
            out.push((format!("{} #{j}", case.about), m));
        }
    }
    out
}

fn normalized(data: &[u8]) -> Result<String, AdapterError> {
    normalize_json(data).map_err(|e| AdapterError::Serialization(e.to_string()))
}

/// Marshals `spec` as built by `source` and checks that every
/// implementation unmarshals it and marshals back the same document.
pub fn run_serialization_case(
    registry: &Registry,
    about: &str,
    spec: &MacaroonSpec,
    source: &Implementation,
) -> ConsistencyReport {
    let title = format!("serialization: {about} (from {})", source.name());
    let data = make_macaroon(source.package(), spec)
        .and_then(|m| m.marshal_json())
        .and_then(|data| normalized(&data).map(|n| (data, n)));
    let (data, expected) = match data {
        Ok(d) => d,
        Err(err) => {
            let mut report = ConsistencyReport::new(title);
            report.record(source, Err(err));
            report.expect_each(|o| {
                Some(Mismatch {
                    expected: "a marshalable macaroon".to_string(),
                    actual: o.outcome.describe(),
                })
            });
            return report;
        }
    };
    let mut report = check_consistency(registry, title, &[], |imp| {
        let m = imp.package().unmarshal_json(&data)?;
        Ok(json!(normalized(&m.marshal_json()?)?))
    });
    report.expect_each(expect_value(json!(expected)));
    report
}

fn serialization_suite(registry: &Registry) -> SuiteReport {
    let mut suite = SuiteReport::new(SuiteName::Serialization.as_str());
    for (about, spec) in serialization_macaroons() {
        for source in registry.entries() {
            suite
                .cases
                .push(run_serialization_case(registry, &about, &spec, source));
        }
    }
    suite
}

fn caveat_immutability(imp: &Implementation) -> Result<Value, AdapterError> {
    let base = imp.package().new_macaroon(b"root-key", "root-id", "somewhere")?;
    let before = encode_hex(&base.signature()?);
    let first = base.with_first_party_caveat("wonderful")?;
    let second = base.with_first_party_caveat("splendid")?;
    Ok(json!({
        "base": before,
        "first": encode_hex(&first.signature()?),
        "second": encode_hex(&second.signature()?),
        "base_after": encode_hex(&base.signature()?),
    }))
}

fn immutability_holds(o: &ImplementationOutcome) -> Option<Mismatch> {
    let v = o.outcome.value()?;
    let sig = |k: &str| v.get(k).and_then(Value::as_str).unwrap_or_default();
    let distinct = sig("first") != sig("second")
        && sig("first") != sig("base")
        && sig("second") != sig("base");
    if distinct && sig("base") == sig("base_after") {
        return None;
    }
    Some(Mismatch {
        expected: "branched caveats with distinct signatures and an unchanged base".to_string(),
        actual: v.to_string(),
    })
}

fn bind_determinism(imp: &Implementation) -> Result<Value, AdapterError> {
    let pkg = imp.package();
    let primary = pkg
        .new_macaroon(b"root-key", "root-id", "")?
        .with_first_party_caveat("wonderful")?;
    let discharge = pkg
        .new_macaroon(b"bob-caveat-root-key", "bob-is-great", "bob")?
        .with_first_party_caveat("splendid")?;
    let a = discharge.bind(primary.as_ref())?;
    let b = discharge.bind(primary.as_ref())?;
    Ok(json!({
        "first": encode_hex(&a.signature()?),
        "second": encode_hex(&b.signature()?),
        "unbound": encode_hex(&discharge.signature()?),
    }))
}

fn bind_is_deterministic(o: &ImplementationOutcome) -> Option<Mismatch> {
    let v = o.outcome.value()?;
    if v["first"] == v["second"] && v["first"] != v["unbound"] {
        return None;
    }
    Some(Mismatch {
        expected: "equal bound signatures, different from the unbound one".to_string(),
        actual: v.to_string(),
    })
}

fn properties_suite(registry: &Registry) -> SuiteReport {
    let mut suite = SuiteReport::new(SuiteName::Properties.as_str());

    let mut report =
        check_consistency(registry, "properties: caveat immutability", &[], caveat_immutability);
    report.expect_each(immutability_holds);
    suite.cases.push(report);

    let mut report =
        check_consistency(registry, "properties: bind determinism", &[], bind_determinism);
    report.expect_each(bind_is_deterministic);
    suite.cases.push(report);

    suite
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::Inconsistency;
    use crate::testing::FakePackage;

    fn registry(pkgs: Vec<(&str, FakePackage)>) -> Registry {
        Registry::new(
            pkgs.into_iter()
                .map(|(name, p)| Implementation::new(name, "fake", Box::new(p)))
                .collect(),
        )
        .expect("registry")
    }

    fn strict_pair() -> Registry {
        registry(vec![("a", FakePackage::new("a")), ("b", FakePackage::new("b"))])
    }

    #[test]
    fn suite_names_parse() {
        for s in SuiteName::ALL {
            assert_eq!(s.as_str().parse::<SuiteName>().expect("parse"), s);
        }
        assert!("everything".parse::<SuiteName>().is_err());
    }

    #[test]
    fn verify_tables_cover_every_condition() {
        let cases = verify_cases();
        assert_eq!(cases.len(), 10);
        assert_eq!(cases.iter().map(|c| c.conditions.len()).sum::<usize>(), 17);
        assert_eq!(
            cases
                .iter()
                .flat_map(|c| &c.conditions)
                .filter(|c| c.lenient_ok)
                .count(),
            4
        );
    }

    #[test]
    fn strict_implementations_meet_every_verify_expectation() {
        let report = run_suite(SuiteName::Verify, &strict_pair(), NonceSource::Zero);
        assert_eq!(report.cases.len(), 17);
        for case in &report.cases {
            assert!(case.is_clean(), "{case:#?}");
        }
    }

    #[test]
    fn lenient_implementation_is_excepted_where_allowed() {
        let reg = registry(vec![
            ("strict", FakePackage::new("s")),
            ("lenient", FakePackage::new("l").lenient()),
        ]);
        let cases = verify_cases();
        let unused = cases
            .iter()
            .find(|c| c.about == "unused discharge")
            .expect("case");
        let report = run_verify_case(&reg, unused, 0, &unused.conditions[0]);
        assert!(report.is_clean(), "{report:#?}");
        assert!(report.outcome("lenient").and_then(Outcome::value).is_some());
        assert!(report.outcome("strict").and_then(Outcome::error).is_some());

        let missing = &cases[0];
        let report = run_verify_case(&reg, missing, 0, &missing.conditions[0]);
        assert!(report.is_clean(), "{report:#?}");
    }

    #[test]
    fn lenient_success_where_failure_is_required_is_reported() {
        let reg = registry(vec![("lenient", FakePackage::new("l").lenient())]);
        let cases = verify_cases();
        let unused = cases
            .iter()
            .find(|c| c.about == "unused discharge")
            .expect("case");
        let strict_only = ConditionCase::fails(&[], "discharge macaroon \"unused\" was not used");
        let report = run_verify_case(&reg, unused, 0, &strict_only);
        assert!(matches!(
            report.inconsistencies.as_slice(),
            [Inconsistency::ExpectationMismatch { implementation, .. }]
                if implementation == "lenient"
        ));
    }

    #[test]
    fn strict_failure_with_the_wrong_class_is_reported() {
        let cases = verify_cases();
        let missing = &cases[0];
        let wrong_reason = ConditionCase::fails(&[("wonderful", false)], NOT_FOUND_BOB);
        let report = run_verify_case(&strict_pair(), missing, 0, &wrong_reason);

        assert!(report.harness_errors.is_empty(), "{report:#?}");
        assert_eq!(report.inconsistencies.len(), 2, "{report:#?}");
        for inc in &report.inconsistencies {
            let Inconsistency::ExpectationMismatch { expected, actual, .. } = inc else {
                panic!("unexpected inconsistency {inc:?}");
            };
            assert_eq!(expected, "failure of class discharge_not_found");
            assert!(actual.starts_with("failure of class condition_not_met"), "{actual}");
        }
    }

    #[test]
    fn lenient_failure_class_is_not_checked() {
        let reg = registry(vec![("lenient", FakePackage::new("l").lenient())]);
        let cases = verify_cases();
        let missing = &cases[0];
        let wrong_reason = ConditionCase::fails(&[("wonderful", false)], NOT_FOUND_BOB);
        let report = run_verify_case(&reg, missing, 0, &wrong_reason);
        assert!(report.is_clean(), "{report:#?}");
    }

    #[test]
    fn fake_signatures_are_consistent_but_miss_the_vectors() {
        let reg = strict_pair();
        let report = run_suite(SuiteName::Signature, &reg, NonceSource::Zero);
        assert_eq!(report.cases.len(), 6);
        for case in &report.cases {
            assert_eq!(case.inconsistencies.len(), 2, "{case:#?}");
            assert!(case
                .inconsistencies
                .iter()
                .all(|i| matches!(i, Inconsistency::ExpectationMismatch { .. })));
        }
    }

    #[test]
    fn random_nonce_skips_third_party_vectors() {
        let reg = strict_pair();
        let report = run_suite(SuiteName::Signature, &reg, NonceSource::Random);
        assert_eq!(report.cases.len(), 5);
        assert_eq!(report.skipped.len(), 1);

        let report = run_suite(SuiteName::Bind, &reg, NonceSource::Random);
        assert!(report.cases.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn serialization_round_trips_across_implementations() {
        let report = run_suite(SuiteName::Serialization, &strict_pair(), NonceSource::Zero);
        let macaroons = serialization_macaroons().len();
        assert_eq!(report.cases.len(), macaroons * 2);
        for case in &report.cases {
            assert!(case.is_clean(), "{case:#?}");
        }
    }

    #[test]
    fn properties_hold_for_fake_packages() {
        let report = run_suite(SuiteName::Properties, &strict_pair(), NonceSource::Zero);
        assert_eq!(report.cases.len(), 2);
        for case in &report.cases {
            assert!(case.is_clean(), "{case:#?}");
        }
    }

    #[test]
    fn broken_source_is_a_harness_error() {
        let reg = registry(vec![
            ("a", FakePackage::new("a")),
            ("b", FakePackage::new("b").broken()),
        ]);
        let (about, spec) = serialization_macaroons().swap_remove(0);
        let report = run_serialization_case(&reg, &about, &spec, &reg.entries()[1]);
        assert!(report.is_consistent());
        assert_eq!(report.harness_errors.len(), 1);
        assert_eq!(report.outcomes.len(), 1);
    }
}
