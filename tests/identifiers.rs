use std::collections::HashSet;

use fieldtrials::identifier::{Identifier, IdentifierGenerator};

#[test]
fn identifiers_render_as_hex() {
    let id = Identifier::parse("65f1a2b3c4d5e6f708192a3b").expect("id");
    assert_eq!(id.to_string(), "65f1a2b3c4d5e6f708192a3b");
    assert_eq!(id.timestamp(), 0x65f1a2b3);
    assert_eq!(serde_json::to_value(id).expect("json"), "65f1a2b3c4d5e6f708192a3b");
    let back: Identifier = serde_json::from_str("\"65f1a2b3c4d5e6f708192a3b\"").expect("parse");
    assert_eq!(back, id);
}

#[test]
fn malformed_identifiers_are_rejected() {
    assert!(Identifier::parse("").is_err());
    assert!(Identifier::parse("65f1a2b3").is_err());
    assert!(Identifier::parse("zzf1a2b3c4d5e6f708192a3b").is_err());
    assert!("65f1a2b3c4d5e6f708192a3b00".parse::<Identifier>().is_err());
}

#[test]
fn generated_identifiers_are_unique() {
    let mut ids = IdentifierGenerator::new();
    let minted: HashSet<Identifier> = (0..1000).map(|_| ids.generate()).collect();
    assert_eq!(minted.len(), 1000);
    let other = IdentifierGenerator::new().generate();
    assert!(other.timestamp() > 0);
}
