//! Wire-level behavior across the public API.

use solanum_proto::{mask_match, MsgBuf, ParseError, DATALEN, MAXPARA};

#[test]
fn parse_serialize_roundtrip() {
    let cases = [
        "PING LAG123",
        ":irc.example.net 001 alice :Welcome to the ExampleNet Internet Relay Chat Network alice",
        ":alice!~a@host.example PRIVMSG #channel :hello there",
        ":0AB SJOIN 1600000000 #chan +nt :@0ABAAAAAB +0ABAAAAAC",
        "MODE #chan +kl sesame 42",
    ];
    for raw in cases {
        let parsed = MsgBuf::parse(raw).expect(raw);
        let reparsed = MsgBuf::parse(&parsed.serialize(0)).expect(raw);
        assert_eq!(parsed, reparsed, "round trip differs for {raw}");
    }
}

#[test]
fn tag_capability_elision_is_total() {
    let mut msg = MsgBuf::new("PRIVMSG").with_param("#c").with_param("x");
    msg.append_tag("time", Some("t1".into()), 0b001);
    msg.append_tag("msgid", Some("m1".into()), 0b010);
    msg.append_tag("account", Some("a1".into()), 0b110);

    for caps in 0u64..8 {
        let line = msg.serialize(caps);
        let reparsed = MsgBuf::parse(&line).unwrap();
        for tag in &msg.tags {
            let visible = reparsed.tags.iter().any(|t| t.key == tag.key);
            assert_eq!(
                visible,
                tag.capmask & caps != 0,
                "caps={caps:03b} tag={}",
                tag.key
            );
        }
    }
}

#[test]
fn serialized_body_never_exceeds_budget() {
    let msg = MsgBuf::new("PRIVMSG")
        .with_source("some!long@prefix.example.net")
        .with_param("#channel")
        .with_param("y".repeat(2000));
    let line = msg.serialize(0);
    assert!(line.len() <= DATALEN);
}

#[test]
fn tag_escaping_survives_the_wire() {
    let mut msg = MsgBuf::new("TAGMSG").with_param("#c");
    msg.append_tag("+draft/reply", Some("id with space;and semi".into()), 1);
    let reparsed = MsgBuf::parse(&msg.serialize(1)).unwrap();
    assert_eq!(
        reparsed.tags[0].value.as_deref(),
        Some("id with space;and semi")
    );
}

#[test]
fn middle_parameter_budget() {
    let params: Vec<String> = (0..MAXPARA).map(|i| i.to_string()).collect();
    let line = format!("CMD {} :trailing words", params.join(" "));
    let msg = MsgBuf::parse(&line).unwrap();
    assert_eq!(msg.params.len(), MAXPARA + 1);
    assert_eq!(msg.params.last().unwrap(), "trailing words");
}

#[test]
fn empty_and_oversize_lines() {
    assert_eq!(MsgBuf::parse("").unwrap_err(), ParseError::EmptyLine);
    let long = format!("TOPIC #c :{}", "z".repeat(1000));
    assert_eq!(MsgBuf::parse(&long).unwrap_err(), ParseError::InputTooLong);
}

#[test]
fn mask_match_hostmask_shapes() {
    assert!(mask_match("*!*@*.example.com", "nick!user@irc.example.com"));
    assert!(mask_match("nick[a]!*@*", "NICK{A}!u@h"));
    assert!(!mask_match("*!*@*.example.com", "nick!user@example.org"));
}
