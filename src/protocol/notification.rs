//! Parsing of modem notification lines.
//!
//! Two notifications are recognized:
//!
//! - `+CMTI: "SM",3` - a new message was stored at index 3.
//! - `+CMT: ...` / `+CMGR: ...` - a message header; the body follows on the
//!   next line. In PDU mode the header ends with the TPDU length and the body
//!   is hex; in text mode the header carries the quoted sender.

/// Header announcing that a message body follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyHeader {
    /// Text mode: the body is plain text from `sender`.
    Text { sender: String },
    /// PDU mode: the body is an SMS-DELIVER of `length` TPDU octets.
    Pdu { length: usize },
}

/// Event recognized from a single notification line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A new message was stored in `storage` at `index`.
    MessageStored { storage: String, index: u32 },
    /// A message body follows on the next line.
    MessageBody(BodyHeader),
}

impl Notification {
    /// Returns true for `+CMTI` store indications.
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::MessageStored { .. })
    }
}

/// Splits a comma-separated parameter list, keeping quoted commas intact.
fn split_fields(params: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, c) in params.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                fields.push(params[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(params[start..].trim());
    fields
}

fn unquote(field: &str) -> &str {
    field
        .strip_prefix('"')
        .and_then(|f| f.strip_suffix('"'))
        .unwrap_or(field)
}

fn is_quoted(field: &str) -> bool {
    field.len() >= 2 && field.starts_with('"') && field.ends_with('"')
}

fn pdu_length(fields: &[&str]) -> Option<BodyHeader> {
    let length = fields.last()?.parse().ok()?;
    Some(BodyHeader::Pdu { length })
}

/// Parses a notification line.
///
/// Returns `None` for anything that is not a recognized notification.
#[must_use]
pub fn parse_notification_line(line: &str) -> Option<Notification> {
    let line = line.trim();

    if let Some(params) = line.strip_prefix("+CMTI:") {
        let fields = split_fields(params);
        let [storage, index] = fields.as_slice() else {
            return None;
        };
        return Some(Notification::MessageStored {
            storage: unquote(storage).to_owned(),
            index: index.parse().ok()?,
        });
    }

    if let Some(params) = line.strip_prefix("+CMT:") {
        let fields = split_fields(params);
        // PDU mode is `[<alpha>],<length>`; text mode has the timestamp too
        let header = match fields.as_slice() {
            [_, _] => pdu_length(&fields)?,
            [sender, ..] if is_quoted(sender) => BodyHeader::Text {
                sender: unquote(sender).to_owned(),
            },
            _ => return None,
        };
        return Some(Notification::MessageBody(header));
    }

    if let Some(params) = line.strip_prefix("+CMGR:") {
        let fields = split_fields(params);
        let header = match fields.as_slice() {
            [status, sender, ..] if is_quoted(status) => BodyHeader::Text {
                sender: unquote(sender).to_owned(),
            },
            _ => pdu_length(&fields)?,
        };
        return Some(Notification::MessageBody(header));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stored() {
        assert_eq!(
            parse_notification_line("+CMTI: \"SM\",3\r\n"),
            Some(Notification::MessageStored {
                storage: "SM".into(),
                index: 3
            })
        );
        assert_eq!(
            parse_notification_line("+CMTI: \"ME\",12"),
            Some(Notification::MessageStored {
                storage: "ME".into(),
                index: 12
            })
        );
    }

    #[test]
    fn test_parse_stored_malformed() {
        assert_eq!(parse_notification_line("+CMTI: \"SM\""), None);
        assert_eq!(parse_notification_line("+CMTI: \"SM\",x"), None);
    }

    #[test]
    fn test_parse_cmt_pdu() {
        assert_eq!(
            parse_notification_line("+CMT: ,27"),
            Some(Notification::MessageBody(BodyHeader::Pdu { length: 27 }))
        );
    }

    #[test]
    fn test_parse_cmt_pdu_with_alpha() {
        assert_eq!(
            parse_notification_line("+CMT: \"\",24"),
            Some(Notification::MessageBody(BodyHeader::Pdu { length: 24 }))
        );
    }

    #[test]
    fn test_parse_cmt_text() {
        assert_eq!(
            parse_notification_line("+CMT: \"+99365123456\",,\"24/10/16,12:00:00+20\""),
            Some(Notification::MessageBody(BodyHeader::Text {
                sender: "+99365123456".into()
            }))
        );
    }

    #[test]
    fn test_parse_cmgr() {
        assert_eq!(
            parse_notification_line("+CMGR: 0,,40"),
            Some(Notification::MessageBody(BodyHeader::Pdu { length: 40 }))
        );
        assert_eq!(
            parse_notification_line("+CMGR: \"REC UNREAD\",\"0800\",,\"24/10/16,12:00:00+20\""),
            Some(Notification::MessageBody(BodyHeader::Text {
                sender: "0800".into()
            }))
        );
    }

    #[test]
    fn test_unrecognized_lines() {
        for line in ["OK", "", "RING", "+CMGS: 12", "+CREG: 1", "random noise"] {
            assert_eq!(parse_notification_line(line), None, "{line:?}");
        }
    }
}
