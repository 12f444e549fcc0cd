#![no_main]

use libfuzzer_sys::fuzz_target;
use redes_sync::{extract_fault_string, render_set_ticket_envelope, TicketKey, TicketPayload};

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let (primary_key, dialog) = raw.split_once('\n').unwrap_or((raw.as_ref(), raw.as_ref()));

    let payload = TicketPayload::new(
        TicketKey {
            primary_key: primary_key.to_string(),
            mirror_key: "RED-1714000000".to_string(),
        },
        dialog,
        "ibiocom",
    );
    let envelope = render_set_ticket_envelope(&payload);

    assert!(envelope.contains("<tic:setTroubleTicketByValue>"));
    assert!(envelope.contains("</soapenv:Envelope>"));
    // Field text is escaped on the way in, so no input can smuggle a
    // fault element into a request envelope.
    assert_eq!(extract_fault_string(&envelope), None);
});
