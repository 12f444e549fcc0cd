//! SOAP envelope rendering and fault extraction for the Adamo gateway.
//!
//! The gateway speaks SOAP 1.1 with a single `setTroubleTicketByValue`
//! operation. The envelope is small and fixed, so it is rendered directly
//! rather than through an XML library; fault extraction scans for the
//! `faultstring` element the gateway places inside fault responses.

use crate::TicketPayload;

const FAULT_OPEN_MARKER: &str = "<faultstring";
const FAULT_CLOSE_MARKER: &str = "</faultstring>";

/// Renders the SOAP 1.1 request envelope for `payload`.
pub fn render_set_ticket_envelope(payload: &TicketPayload) -> String {
    let mut body = String::new();
    body.push_str("<troubleTicketKey>");
    push_text_element(
        &mut body,
        "primaryKey",
        &payload.trouble_ticket_key.primary_key,
    );
    push_text_element(
        &mut body,
        "mirrorKey",
        &payload.trouble_ticket_key.mirror_key,
    );
    body.push_str("</troubleTicketKey>");

    if let Some(state) = payload.base_trouble_ticket_state.as_deref() {
        push_text_element(&mut body, "baseTroubleTicketState", state);
    }
    push_text_element(&mut body, "dialog", &payload.dialog);
    push_text_element(&mut body, "clearancePerson", &payload.clearance_person);
    if let Some(value) = payload.date_restore_service.as_deref() {
        push_text_element(&mut body, "dateRestoreService", value);
    }
    if let Some(value) = payload.raw_resolution.as_deref() {
        push_text_element(&mut body, "rawResolution", value);
    }
    if let Some(value) = payload.certification.as_deref() {
        push_text_element(&mut body, "certification", value);
    }
    if let Some(value) = payload.department.as_deref() {
        push_text_element(&mut body, "department", value);
    }
    if let Some(value) = payload.raw_real_tipification.as_deref() {
        push_text_element(&mut body, "rawRealTipification", value);
    }
    for attachment in &payload.attachments {
        body.push_str("<attachments>");
        push_text_element(&mut body, "content", &attachment.content);
        push_text_element(&mut body, "mimeType", &attachment.mime_type);
        push_text_element(&mut body, "name", &attachment.name);
        body.push_str("</attachments>");
    }

    format!(
        "<soapenv:Envelope xmlns:soapenv=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         xmlns:tic=\"http://ws.adamo.gateway/troubleticket\">\
         <soapenv:Header/>\
         <soapenv:Body><tic:setTroubleTicketByValue>{body}</tic:setTroubleTicketByValue></soapenv:Body>\
         </soapenv:Envelope>"
    )
}

/// Returns the text of the first `faultstring` element in `body`, if any.
///
/// Accepts the element with or without attributes and unescapes the five XML
/// entities. An empty fault string is treated as no fault.
pub fn extract_fault_string(body: &str) -> Option<String> {
    let open = body.find(FAULT_OPEN_MARKER)?;
    let rest = &body[open..];
    let content_start = rest.find('>')? + 1;
    let rest = &rest[content_start..];
    let end = rest.find(FAULT_CLOSE_MARKER)?;
    let raw = rest[..end].trim();
    if raw.is_empty() {
        return None;
    }
    Some(unescape_xml_text(raw))
}

fn push_text_element(buffer: &mut String, tag: &str, value: &str) {
    buffer.push('<');
    buffer.push_str(tag);
    buffer.push('>');
    buffer.push_str(&escape_xml_text(value));
    buffer.push_str("</");
    buffer.push_str(tag);
    buffer.push('>');
}

fn escape_xml_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for character in value.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn unescape_xml_text(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
