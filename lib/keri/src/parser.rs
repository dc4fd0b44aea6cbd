//! Incremental stream parsing
//!
//! The parser owns an accumulating buffer and a cursor. Extraction never
//! blocks: when the buffer holds less than one complete primitive the
//! current position is left untouched and the caller is expected to feed
//! more bytes and re-invoke. Attachment sections are required to open with
//! a counter so the text/binary domain is always known, and a quadlet-
//! counted enclosing group bounds errors so a bad group can be dropped
//! without losing sync on the rest of the stream.

use cesr::{Counter, CounterCode, IndexedSignature, Matter as _, PublicKey, Signature};

use crate::error::KeriError;
use crate::processor::EventProcessor;
use crate::serder::EventMessage;

/// Stream classification from the leading three bits of the next byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cold {
    /// A serialized event message (JSON, CBOR, or MessagePack start byte).
    Message,
    /// Text-domain counter or op code.
    CounterText,
    /// Binary-domain counter or op code.
    CounterBinary,
}

/// Classifies the next stream byte. Anything unrecognized means the stream
/// position cannot be trusted.
pub fn sniff(byte: u8) -> Result<Cold, KeriError> {
    match byte >> 5 {
        0b001 | 0b010 => Ok(Cold::CounterText),
        0b011 | 0b100 | 0b101 | 0b110 => Ok(Cold::Message),
        0b111 => Ok(Cold::CounterBinary),
        _ => Err(KeriError::ColdStart(byte)),
    }
}

/// One counter-framed group of attached material.
#[derive(Debug, Clone, PartialEq)]
pub enum AttachmentGroup {
    ControllerSignatures(Vec<IndexedSignature>),
    WitnessSignatures(Vec<IndexedSignature>),
    ReceiptCouples(Vec<(PublicKey, Signature)>),
}

/// The attachment section following one event message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachments {
    pub groups: Vec<AttachmentGroup>,
}

impl Attachments {
    pub fn from_groups(groups: Vec<AttachmentGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// All controller indexed signatures, flattened.
    pub fn controller_signatures(&self) -> Vec<IndexedSignature> {
        self.groups
            .iter()
            .filter_map(|g| match g {
                AttachmentGroup::ControllerSignatures(sigs) => Some(sigs.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn witness_signatures(&self) -> Vec<IndexedSignature> {
        self.groups
            .iter()
            .filter_map(|g| match g {
                AttachmentGroup::WitnessSignatures(sigs) => Some(sigs.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn receipt_couples(&self) -> Vec<(PublicKey, Signature)> {
        self.groups
            .iter()
            .filter_map(|g| match g {
                AttachmentGroup::ReceiptCouples(couples) => Some(couples.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Renders the section in the text domain, each group fronted by its
    /// counter. Used to store escrowed messages in re-playable form.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for group in &self.groups {
            match group {
                AttachmentGroup::ControllerSignatures(sigs) => {
                    render_counted(&mut out, CounterCode::ControllerIdxSigs, sigs.len(), |o| {
                        for sig in sigs {
                            o.push_str(&sig.qb64());
                        }
                    });
                }
                AttachmentGroup::WitnessSignatures(sigs) => {
                    render_counted(&mut out, CounterCode::WitnessIdxSigs, sigs.len(), |o| {
                        for sig in sigs {
                            o.push_str(&sig.qb64());
                        }
                    });
                }
                AttachmentGroup::ReceiptCouples(couples) => {
                    render_counted(
                        &mut out,
                        CounterCode::NonTransReceiptCouples,
                        couples.len(),
                        |o| {
                            for (verifier, cigar) in couples {
                                o.push_str(&verifier.qb64());
                                o.push_str(&cigar.qb64());
                            }
                        },
                    );
                }
            }
        }
        out
    }

    /// Parses a complete text-domain attachment section.
    pub fn from_text(text: &str) -> Result<Self, KeriError> {
        let (attachments, consumed) = parse_attachments(text.as_bytes(), true)?;
        if consumed != text.len() {
            return Err(KeriError::Validation(format!(
                "{} unparsed attachment bytes",
                text.len() - consumed
            )));
        }
        Ok(attachments)
    }
}

fn render_counted(
    out: &mut String,
    code: CounterCode,
    count: usize,
    body: impl FnOnce(&mut String),
) {
    // counter construction cannot fail for in-range group sizes
    if let Ok(counter) = Counter::new(code, count as u64) {
        out.push_str(&counter.qb64());
    }
    body(out);
}

/// Longest ASCII prefix of `stream` as a str, with a flag telling whether it
/// ends at the buffer end (true) or at a non-ASCII byte (false).
fn text_window(stream: &[u8]) -> (&str, bool) {
    let cut = stream
        .iter()
        .position(|&b| b >= 0x80)
        .unwrap_or(stream.len());
    let window = std::str::from_utf8(&stream[..cut]).unwrap_or("");
    (window, cut == stream.len())
}

/// Re-interprets a shortage against a window that was cut by non-ASCII
/// material: text that runs into binary bytes is malformed, not incomplete.
fn check_window(err: KeriError, clean: bool) -> KeriError {
    if err.is_shortage() && !clean {
        KeriError::Validation("Text material runs into binary bytes".to_string())
    } else {
        err
    }
}

/// Parses one plain (non-enclosing) group in the text domain, returning the
/// group and consumed byte count.
fn parse_group_text(stream: &[u8]) -> Result<(AttachmentGroup, usize), KeriError> {
    let (window, clean) = text_window(stream);
    let (counter, mut at) =
        Counter::from_stream_text(window).map_err(|e| check_window(e.into(), clean))?;
    let group = match counter.code() {
        CounterCode::ControllerIdxSigs | CounterCode::WitnessIdxSigs => {
            let mut sigs = Vec::with_capacity(counter.count() as usize);
            for _ in 0..counter.count() {
                let (sig, consumed) = IndexedSignature::from_stream_text(&window[at..])
                    .map_err(|e| check_window(e.into(), clean))?;
                sigs.push(sig);
                at += consumed;
            }
            if counter.code() == CounterCode::ControllerIdxSigs {
                AttachmentGroup::ControllerSignatures(sigs)
            } else {
                AttachmentGroup::WitnessSignatures(sigs)
            }
        }
        CounterCode::NonTransReceiptCouples => {
            let mut couples = Vec::with_capacity(counter.count() as usize);
            for _ in 0..counter.count() {
                let (verifier, consumed) = PublicKey::from_stream_text(&window[at..])
                    .map_err(|e| check_window(e.into(), clean))?;
                at += consumed;
                let (cigar, consumed) = Signature::from_stream_text(&window[at..])
                    .map_err(|e| check_window(e.into(), clean))?;
                at += consumed;
                couples.push((verifier, cigar));
            }
            AttachmentGroup::ReceiptCouples(couples)
        }
        CounterCode::AttachmentGroup => {
            return Err(KeriError::Validation(
                "Nested enclosing attachment group".to_string(),
            ));
        }
    };
    Ok((group, at))
}

/// Parses one plain group in the binary domain.
fn parse_group_b2(stream: &[u8]) -> Result<(AttachmentGroup, usize), KeriError> {
    let (counter, mut at) = Counter::from_stream_b2(stream)?;
    let group = match counter.code() {
        CounterCode::ControllerIdxSigs | CounterCode::WitnessIdxSigs => {
            let mut sigs = Vec::with_capacity(counter.count() as usize);
            for _ in 0..counter.count() {
                let (sig, consumed) = IndexedSignature::from_stream_b2(&stream[at..])?;
                sigs.push(sig);
                at += consumed;
            }
            if counter.code() == CounterCode::ControllerIdxSigs {
                AttachmentGroup::ControllerSignatures(sigs)
            } else {
                AttachmentGroup::WitnessSignatures(sigs)
            }
        }
        CounterCode::NonTransReceiptCouples => {
            let mut couples = Vec::with_capacity(counter.count() as usize);
            for _ in 0..counter.count() {
                let (verifier, consumed) = PublicKey::from_stream_b2(&stream[at..])?;
                at += consumed;
                let (cigar, consumed) = Signature::from_stream_b2(&stream[at..])?;
                at += consumed;
                couples.push((verifier, cigar));
            }
            AttachmentGroup::ReceiptCouples(couples)
        }
        CounterCode::AttachmentGroup => {
            return Err(KeriError::Validation(
                "Nested enclosing attachment group".to_string(),
            ));
        }
    };
    Ok((group, at))
}

/// Parses the bounded interior of an enclosing group: consecutive plain
/// groups that must consume the region exactly.
fn parse_enclosed(region: &[u8], binary: bool) -> Result<Vec<AttachmentGroup>, KeriError> {
    let mut groups = Vec::new();
    let mut at = 0;
    while at < region.len() {
        let (group, consumed) = if binary {
            parse_group_b2(&region[at..])?
        } else {
            parse_group_text(&region[at..])?
        };
        groups.push(group);
        at += consumed;
    }
    Ok(groups)
}

/// Parses the attachment section after an event.
///
/// Returns the collected groups and consumed bytes. With `at_end` false the
/// section is open-ended: exhausting the buffer suspends with `Shortage`
/// since more groups may still arrive; the section only closes at the start
/// of the next event message. Errors inside an enclosing (quadlet-counted)
/// group discard that group alone; errors outside one are fatal to the
/// stream.
pub(crate) fn parse_attachments(
    stream: &[u8],
    at_end: bool,
) -> Result<(Attachments, usize), KeriError> {
    let mut groups = Vec::new();
    let mut at = 0;
    loop {
        if at >= stream.len() {
            if at_end {
                return Ok((Attachments::from_groups(groups), at));
            }
            return Err(KeriError::Shortage { needed: 1 });
        }
        match sniff(stream[at])? {
            Cold::Message => return Ok((Attachments::from_groups(groups), at)),
            Cold::CounterText => {
                let (window, clean) = text_window(&stream[at..]);
                let (counter, head) =
                    Counter::from_stream_text(window).map_err(|e| check_window(e.into(), clean))?;
                if counter.code() == CounterCode::AttachmentGroup {
                    let bound = counter.count() as usize * 4;
                    if window.len() < head + bound {
                        return Err(check_window(
                            KeriError::Shortage {
                                needed: head + bound - window.len(),
                            },
                            clean,
                        ));
                    }
                    let region = &stream[at + head..at + head + bound];
                    match parse_enclosed(region, false) {
                        Ok(inner) => groups.extend(inner),
                        Err(err) => {
                            tracing::warn!(%err, "Discarding bad pipelined attachment group");
                        }
                    }
                    at += head + bound;
                } else {
                    let (group, consumed) = parse_group_text(&stream[at..])?;
                    groups.push(group);
                    at += consumed;
                }
            }
            Cold::CounterBinary => {
                let (counter, head) = Counter::from_stream_b2(&stream[at..])?;
                if counter.code() == CounterCode::AttachmentGroup {
                    let bound = counter.count() as usize * 3;
                    if stream.len() < at + head + bound {
                        return Err(KeriError::Shortage {
                            needed: at + head + bound - stream.len(),
                        });
                    }
                    let region = &stream[at + head..at + head + bound];
                    match parse_enclosed(region, true) {
                        Ok(inner) => groups.extend(inner),
                        Err(err) => {
                            tracing::warn!(%err, "Discarding bad pipelined attachment group");
                        }
                    }
                    at += head + bound;
                } else {
                    let (group, consumed) = parse_group_b2(&stream[at..])?;
                    groups.push(group);
                    at += consumed;
                }
            }
        }
    }
}

/// A resumable parser over an accumulating byte stream.
///
/// Feed bytes as they arrive, then call [`StreamParser::parse`] with the
/// processor that should receive complete messages. A message is dispatched
/// once its attachment section is closed by the next message or by
/// [`StreamParser::finish`]. Fatal framing errors flush the buffer, since
/// the position can no longer be trusted.
#[derive(Default)]
pub struct StreamParser {
    buf: Vec<u8>,
    offset: usize,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered but not yet consumed.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.offset
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Processes as many complete messages as the buffer holds. Returns the
    /// number dispatched this call; suspends (without error) when the
    /// remainder is an incomplete message.
    pub fn parse(&mut self, processor: &mut EventProcessor) -> Result<usize, KeriError> {
        self.drive(processor, false)
    }

    /// Drains the buffer as a completed stream: the final message's
    /// attachment section is closed by the stream end. An incomplete trailer
    /// is a framing error and the buffer is flushed either way.
    pub fn finish(&mut self, processor: &mut EventProcessor) -> Result<usize, KeriError> {
        let result = self.drive(processor, true);
        self.flush();
        result
    }

    fn flush(&mut self) {
        self.buf.clear();
        self.offset = 0;
    }

    fn drive(&mut self, processor: &mut EventProcessor, at_end: bool) -> Result<usize, KeriError> {
        let mut processed = 0;
        loop {
            if self.offset == self.buf.len() {
                self.flush();
                return Ok(processed);
            }
            let stream = &self.buf[self.offset..];
            let step = extract_one(stream, at_end);
            match step {
                Ok((Some(message), attachments, consumed)) => {
                    self.offset += consumed;
                    match processor.process_message(message, &attachments) {
                        Ok(()) => {}
                        Err(err) if err.is_retryable() => {
                            tracing::debug!(%err, "Message escrowed for retry");
                        }
                        Err(err) => {
                            tracing::warn!(%err, "Discarding invalid message");
                        }
                    }
                    processed += 1;
                }
                Ok((None, _, consumed)) => {
                    // stray attachment material with nothing to attach to
                    tracing::warn!("Discarding {consumed} bytes of unattached material");
                    self.offset += consumed;
                }
                Err(err) if err.is_shortage() => {
                    if at_end {
                        self.flush();
                        return Err(err);
                    }
                    return Ok(processed);
                }
                Err(err) => {
                    self.flush();
                    return Err(err);
                }
            }
        }
    }
}

/// Extracts one message and its attachment section (or one stray attachment
/// section) from the stream front.
#[allow(clippy::type_complexity)]
fn extract_one(
    stream: &[u8],
    at_end: bool,
) -> Result<(Option<EventMessage>, Attachments, usize), KeriError> {
    match sniff(stream[0])? {
        Cold::Message => {
            let (message, head) = EventMessage::from_stream(stream)?;
            let (attachments, tail) = parse_attachments(&stream[head..], at_end)?;
            Ok((Some(message), attachments, head + tail))
        }
        Cold::CounterText | Cold::CounterBinary => {
            let (attachments, consumed) = parse_attachments(stream, at_end)?;
            Ok((None, attachments, consumed))
        }
    }
}
