// Copyright (C) 2025 Ponder Software Co., Ltd.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! XML codec for the `/api/xml/*` surface
//!
//! Requests arrive as
//!
//! ```text
//! <Doc BillType="salesorder" AccNo="001" Token="..">
//!   <Where>cCode = 'SO-1'</Where>
//!   <Head><cSrcID>EXT-9</cSrcID>..</Head>
//!   <Body><Row><cInvCode>A</cInvCode>..</Row>..</Body>
//! </Doc>
//! ```
//!
//! Responses render as XML throughout: fetched rows as
//! `<Doc><Row><col>v</col>..</Row>..</Doc>`, write results as the
//! envelope fields element-by-element under `<Doc>`.

use std::io::Cursor;

use billbus_core::DocumentRequest;
use billbus_core::Envelope;
use billbus_core::envelope::FieldMap;
use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use thiserror::Error;

/// XML surface errors
#[derive(Error, Debug)]
pub enum XmlError {
    /// The request body is not well-formed XML
    #[error("invalid XML: {0}")]
    Parse(String),

    /// The request has no `BillType` attribute on the `Doc` root
    #[error("missing BillType attribute")]
    MissingBillType,
}

fn parse_err(err: impl std::fmt::Display) -> XmlError {
    XmlError::Parse(err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Section {
    None,
    Where,
    Head,
    Row,
}

/// Parse a request document into the transport-independent shape.
pub fn parse_request(xml: &str) -> Result<DocumentRequest, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut request = DocumentRequest::default();
    let mut section = Section::None;
    let mut current_field: Option<String> = None;
    let mut current_row = FieldMap::new();
    let mut where_text = String::new();

    loop {
        match reader.read_event().map_err(parse_err)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "Doc" => {
                        for attr in e.attributes() {
                            let attr = attr.map_err(parse_err)?;
                            let value = attr
                                .unescape_value()
                                .map_err(parse_err)?
                                .into_owned();
                            match attr.key.as_ref() {
                                b"BillType" => request.document_type = value,
                                b"AccNo" => {
                                    if !value.trim().is_empty() {
                                        request.account_id = Some(value);
                                    }
                                }
                                b"Token" => {
                                    if !value.trim().is_empty() {
                                        request.token = Some(value);
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    "Where" => section = Section::Where,
                    "Head" => section = Section::Head,
                    "Body" => {}
                    "Row" => {
                        section = Section::Row;
                        current_row = FieldMap::new();
                    }
                    _ => {
                        if section == Section::Head || section == Section::Row {
                            let target = if section == Section::Head {
                                &mut request.head
                            } else {
                                &mut current_row
                            };
                            // Fields with no text node still appear, empty.
                            target.entry(name.clone()).or_default();
                            current_field = Some(name);
                        }
                    }
                }
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if section == Section::Head {
                    request.head.insert(name, String::new());
                } else if section == Section::Row {
                    current_row.insert(name, String::new());
                }
            }
            Event::Text(t) => {
                let value = t.unescape().map_err(parse_err)?.into_owned();
                match section {
                    Section::Where => where_text.push_str(&value),
                    Section::Head => {
                        if let Some(field) = &current_field {
                            request.head.insert(field.clone(), value);
                        }
                    }
                    Section::Row => {
                        if let Some(field) = &current_field {
                            current_row.insert(field.clone(), value);
                        }
                    }
                    Section::None => {}
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "Where" | "Head" => section = Section::None,
                    "Row" => {
                        request.body.push(std::mem::take(&mut current_row));
                        section = Section::None;
                    }
                    "Body" | "Doc" => {}
                    _ => current_field = None,
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if request.document_type.trim().is_empty() {
        return Err(XmlError::MissingBillType);
    }
    if !where_text.trim().is_empty() {
        request.where_clause = Some(where_text.trim().to_string());
    }
    Ok(request)
}

fn write_field<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), XmlError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(parse_err)?;
    writer
        .write_event(Event::Text(BytesText::new(value)))
        .map_err(parse_err)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(parse_err)?;
    Ok(())
}

fn render<F>(fill: F) -> Result<String, XmlError>
where
    F: FnOnce(&mut Writer<Cursor<Vec<u8>>>) -> Result<(), XmlError>,
{
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(parse_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("Doc")))
        .map_err(parse_err)?;
    fill(&mut writer)?;
    writer
        .write_event(Event::End(BytesEnd::new("Doc")))
        .map_err(parse_err)?;
    Ok(String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned())
}

/// Render fetched rows as `<Doc><Row><col>v</col>..</Row>..</Doc>`.
pub fn render_data(envelope: &Envelope) -> Result<String, XmlError> {
    render(|writer| {
        write_field(writer, "Result", &envelope.result)?;
        write_field(writer, "Code", &envelope.code)?;
        write_field(writer, "Desc", &envelope.desc)?;
        for row in &envelope.data {
            writer
                .write_event(Event::Start(BytesStart::new("Row")))
                .map_err(parse_err)?;
            for (name, value) in row {
                write_field(writer, name, value)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("Row")))
                .map_err(parse_err)?;
        }
        Ok(())
    })
}

/// Render a write envelope field-by-field under `<Doc>`.
pub fn render_envelope(envelope: &Envelope) -> Result<String, XmlError> {
    render(|writer| {
        write_field(writer, "Result", &envelope.result)?;
        write_field(writer, "Code", &envelope.code)?;
        write_field(writer, "Desc", &envelope.desc)?;
        write_field(writer, "NewBillId", &envelope.new_bill_id)?;
        write_field(writer, "NewBillCode", &envelope.new_bill_code)?;
        write_field(writer, "CSrcSysId", &envelope.c_src_sys_id)?;
        write_field(writer, "Time", &envelope.time.to_rfc3339())?;
        Ok(())
    })
}
