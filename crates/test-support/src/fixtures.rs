//! Canned stanzas for harness tests, built from XML the way real server
//! traffic arrives. Builders panic on malformed fixtures: a broken
//! fixture is a bug in the test, not a condition to handle.

use xmpp_parsers::iq::Iq;

use skua_client::next_request_id;
use skua_core::{Stanza, parse_stanza};

/// Parse a fixture stanza, panicking with the offending XML on failure.
pub fn stanza(xml: &str) -> Stanza {
    parse_stanza(xml).unwrap_or_else(|error| panic!("bad stanza fixture: {error}\n{xml}"))
}

/// Parse a fixture IQ, panicking when the XML is not an `<iq/>`.
pub fn iq(xml: &str) -> Iq {
    let Stanza::Iq(iq) = stanza(xml) else {
        panic!("fixture is not an <iq/> stanza:\n{xml}");
    };
    *iq
}

/// A server-initiated roster push for one contact.
pub fn roster_push(id: &str, jid: &str, subscription: &str) -> Stanza {
    stanza(&format!(
        "<iq xmlns='jabber:client' type='set' id='{id}'>\
            <query xmlns='jabber:iq:roster'>\
                <item jid='{jid}' subscription='{subscription}'/>\
            </query>\
        </iq>"
    ))
}

/// A roster push removing a contact.
pub fn roster_remove_push(id: &str, jid: &str) -> Stanza {
    roster_push(id, jid, "remove")
}

/// A client request adding `jid` to the roster, with a fresh request id.
pub fn roster_set_request(jid: &str) -> Iq {
    let id = next_request_id();
    iq(&format!(
        "<iq xmlns='jabber:client' type='set' id='{id}'>\
            <query xmlns='jabber:iq:roster'>\
                <item jid='{jid}'/>\
            </query>\
        </iq>"
    ))
}

/// A one-to-one chat message.
pub fn chat_message(from: &str, to: &str, body: &str) -> Stanza {
    stanza(&format!(
        "<message xmlns='jabber:client' type='chat' from='{from}' to='{to}'>\
            <body>{body}</body>\
        </message>"
    ))
}

/// A presence subscription request from `from`.
pub fn subscribe_presence(from: &str) -> Stanza {
    stanza(&format!(
        "<presence xmlns='jabber:client' type='subscribe' from='{from}'/>"
    ))
}

/// An empty `<iq type='result'/>` correlated to `id`.
pub fn result_reply(id: &str) -> Iq {
    iq(&format!("<iq xmlns='jabber:client' type='result' id='{id}'/>"))
}

/// An `<iq type='error'/>` reply carrying the given defined condition.
pub fn error_reply(id: &str, condition: &str) -> Iq {
    iq(&format!(
        "<iq xmlns='jabber:client' type='error' id='{id}'>\
            <error type='cancel'>\
                <{condition} xmlns='urn:ietf:params:xml:ns:xmpp-stanzas'/>\
            </error>\
        </iq>"
    ))
}
