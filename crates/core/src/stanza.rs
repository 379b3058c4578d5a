use std::str::FromStr;

use xmpp_parsers::{iq::Iq, message::Message, minidom::Element, presence::Presence};

use crate::error::CodecError;
use crate::routing::{RouteKey, StanzaKind};

/// A decoded inbound or outbound stanza.
///
/// The harness never touches the wire; it operates on stanzas the client
/// stack has already decoded. This enum is the in-memory shape handed to
/// handlers, predicates, and fixtures alike.
#[derive(Debug, Clone, PartialEq)]
pub enum Stanza {
    Message(Box<Message>),
    Presence(Box<Presence>),
    Iq(Box<Iq>),
}

impl Stanza {
    pub fn parse(raw: &str) -> Result<Self, CodecError> {
        parse_stanza(raw)
    }

    pub fn to_xml(&self) -> Result<String, CodecError> {
        serialize_stanza(self)
    }

    pub fn to_element(&self) -> Element {
        match self {
            Stanza::Message(message) => (**message).clone().into(),
            Stanza::Presence(presence) => (**presence).clone().into(),
            Stanza::Iq(iq) => (**iq).clone().into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stanza::Message(_) => "message",
            Stanza::Presence(_) => "presence",
            Stanza::Iq(_) => "iq",
        }
    }

    pub fn kind(&self) -> StanzaKind {
        match self {
            Stanza::Message(_) => StanzaKind::Message,
            Stanza::Presence(_) => StanzaKind::Presence,
            Stanza::Iq(_) => StanzaKind::Iq,
        }
    }

    /// Namespace of the stanza's child payload, when it carries one.
    ///
    /// For IQs this is the query namespace (`jabber:iq:roster` for roster
    /// traffic); messages and presences route unscoped.
    pub fn payload_ns(&self) -> Option<String> {
        let Stanza::Iq(iq) = self else {
            return None;
        };

        match iq.as_ref() {
            Iq::Get { payload, .. } | Iq::Set { payload, .. } => Some(payload.ns()),
            Iq::Result {
                payload: Some(payload),
                ..
            } => Some(payload.ns()),
            _ => None,
        }
    }

    /// The scoped key this stanza routes under, falling back to the
    /// unscoped key of its kind when it has no payload namespace.
    pub fn route_key(&self) -> RouteKey {
        RouteKey {
            kind: self.kind(),
            ns: self.payload_ns(),
        }
    }
}

impl TryFrom<Element> for Stanza {
    type Error = CodecError;

    fn try_from(element: Element) -> Result<Self, Self::Error> {
        parse_stanza_element(element)
    }
}

impl From<Stanza> for Element {
    fn from(value: Stanza) -> Self {
        match value {
            Stanza::Message(message) => (*message).into(),
            Stanza::Presence(presence) => (*presence).into(),
            Stanza::Iq(iq) => (*iq).into(),
        }
    }
}

pub fn parse_stanza(xml: &str) -> Result<Stanza, CodecError> {
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err(CodecError::ParseFailed("stanza payload is empty".to_string()));
    }

    let element = Element::from_str(trimmed)
        .map_err(|error| CodecError::ParseFailed(format!("invalid stanza XML: {error}")))?;
    parse_stanza_element(element)
}

pub fn serialize_stanza(stanza: &Stanza) -> Result<String, CodecError> {
    let element = stanza.to_element();
    let mut payload = Vec::new();
    element.write_to(&mut payload).map_err(|error| {
        CodecError::SerializeFailed(format!("<{}/> stanza: {error}", stanza.name()))
    })?;
    String::from_utf8(payload).map_err(|error| {
        CodecError::SerializeFailed(format!("<{}/> stanza produced invalid UTF-8: {error}", stanza.name()))
    })
}

fn parse_stanza_element(element: Element) -> Result<Stanza, CodecError> {
    match element.name() {
        "message" => Message::try_from(element)
            .map(|message| Stanza::Message(Box::new(message)))
            .map_err(|error| CodecError::ParseFailed(format!("<message/> stanza: {error}"))),
        "presence" => Presence::try_from(element)
            .map(|presence| Stanza::Presence(Box::new(presence)))
            .map_err(|error| CodecError::ParseFailed(format!("<presence/> stanza: {error}"))),
        "iq" => Iq::try_from(element)
            .map(|iq| Stanza::Iq(Box::new(iq)))
            .map_err(|error| CodecError::ParseFailed(format!("<iq/> stanza: {error}"))),
        other => Err(CodecError::ParseFailed(format!(
            "unsupported stanza element <{other}/>"
        ))),
    }
}
