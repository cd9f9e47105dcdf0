//! Parsers for command responses that carry data.

use super::notification::{BodyHeader, Notification, parse_notification_line};

/// Extracts the message reference from an `AT+CMGS` response (`+CMGS: <mr>`).
#[must_use]
pub fn parse_send_reference(response: &str) -> Option<u8> {
    response
        .lines()
        .find_map(|line| line.trim().strip_prefix("+CMGS:"))
        .and_then(|mr| mr.trim().parse().ok())
}

/// A message returned by `AT+CMGR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResponse {
    /// Header parsed from the `+CMGR:` line.
    pub header: BodyHeader,
    /// Body lines (PDU hex or text), joined with `\n`.
    pub body: String,
}

/// Parses an `AT+CMGR` response.
///
/// Returns `None` when the slot is empty or the header is not recognized.
#[must_use]
pub fn parse_read_response(response: &str) -> Option<ReadResponse> {
    let mut lines = response.lines().map(str::trim);
    let header = lines.find_map(|line| match parse_notification_line(line) {
        Some(Notification::MessageBody(header)) if line.starts_with("+CMGR:") => Some(header),
        _ => None,
    })?;

    let body: Vec<&str> = lines
        .take_while(|line| *line != "OK")
        .filter(|line| !line.is_empty())
        .collect();
    if body.is_empty() {
        return None;
    }

    Some(ReadResponse {
        header,
        body: body.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_reference() {
        assert_eq!(
            parse_send_reference("\r\n+CMGS: 12\r\n\r\nOK\r\n"),
            Some(12)
        );
        assert_eq!(parse_send_reference("\r\nOK\r\n"), None);
    }

    #[test]
    fn test_parse_read_pdu() {
        let response = "\r\n+CMGR: 0,,24\r\n0004048180000008621016112030000400410042\r\n\r\nOK\r\n";
        let read = parse_read_response(response).unwrap();
        assert_eq!(read.header, BodyHeader::Pdu { length: 24 });
        assert_eq!(read.body, "0004048180000008621016112030000400410042");
    }

    #[test]
    fn test_parse_read_text() {
        let response = "\r\n+CMGR: \"REC UNREAD\",\"0800\",,\"24/10/16,12:00:00+20\"\r\nBalans 3.50 manat\r\n\r\nOK\r\n";
        let read = parse_read_response(response).unwrap();
        assert_eq!(
            read.header,
            BodyHeader::Text {
                sender: "0800".into()
            }
        );
        assert_eq!(read.body, "Balans 3.50 manat");
    }

    #[test]
    fn test_parse_read_empty_slot() {
        assert_eq!(parse_read_response("\r\nOK\r\n"), None);
        assert_eq!(parse_read_response("\r\n+CMGR: 0,,0\r\n\r\nOK\r\n"), None);
    }
}
