//! Text extraction for uploaded files.
//!
//! [`extract`] turns raw upload bytes into plain text, dispatching on the
//! filename extension:
//!
//! | Extension | Strategy |
//! |-----------|----------|
//! | `pdf` | page-by-page text via `pdf-extract`, pages joined with `\n` |
//! | `docx`, `pptx`, `xlsx` | best-effort OOXML text runs; falls back to raw decoding |
//! | anything else | UTF-8, then `latin-1`, `cp1252`, `iso-8859-1` |
//!
//! Extraction never fails. Every failure is converted into a readable
//! placeholder string so chunking always receives text.

use std::io::Read;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum worksheets read from an xlsx workbook.
const XLSX_MAX_SHEETS: usize = 100;

/// Legacy single-byte encodings tried, in order, when UTF-8 decoding fails.
const LEGACY_ENCODINGS: [LegacyEncoding; 3] = [
    LegacyEncoding::Latin1,
    LegacyEncoding::Cp1252,
    LegacyEncoding::Iso8859_1,
];

/// Internal extraction failure; converted to placeholder text by [`extract`].
#[derive(Debug)]
enum ExtractError {
    Pdf(String),
    Ooxml(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "{}", e),
            ExtractError::Ooxml(e) => write!(f, "OOXML extraction failed: {}", e),
        }
    }
}

/// Extract plain text from an uploaded file.
pub fn extract(bytes: &[u8], filename: &str) -> String {
    match file_extension(filename).as_str() {
        "pdf" => extract_pdf_or_placeholder(bytes, filename),
        ext @ ("docx" | "pptx" | "xlsx") => {
            let result = match ext {
                "docx" => extract_docx(bytes),
                "pptx" => extract_pptx(bytes),
                _ => extract_xlsx(bytes),
            };
            match result {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => decode_text(bytes, filename),
                Err(e) => {
                    tracing::warn!("{} for '{}', decoding raw bytes instead", e, filename);
                    decode_text(bytes, filename)
                }
            }
        }
        _ => decode_text(bytes, filename),
    }
}

/// Lower-cased extension after the last `.`, or empty.
fn file_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_lowercase(),
        None => String::new(),
    }
}

// ============ PDF ============

fn extract_pdf_or_placeholder(bytes: &[u8], filename: &str) -> String {
    match extract_pdf_pages(bytes) {
        Ok(pages) => {
            let mut text = String::new();
            for page in pages {
                text.push_str(&page);
                text.push('\n');
            }
            let trimmed = text.trim();
            if trimmed.is_empty() {
                format!(
                    "PDF file '{}' appears to contain no extractable text (possibly scanned images)",
                    filename
                )
            } else {
                trimmed.to_string()
            }
        }
        Err(e) => {
            tracing::warn!("PDF extraction failed for '{}': {}", filename, e);
            format!("Error extracting text from PDF '{}': {}", filename, e)
        }
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    // pdf-extract panics on some malformed inputs.
    let owned = bytes.to_vec();
    let outcome = std::panic::catch_unwind(move || {
        pdf_extract::extract_text_from_mem_by_pages(&owned)
    });
    match outcome {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(_) => Err(ExtractError::Pdf("PDF parser aborted on malformed input".to_string())),
    }
}

// ============ Plain text ============

#[derive(Debug, Clone, Copy)]
enum LegacyEncoding {
    Latin1,
    Cp1252,
    Iso8859_1,
}

impl LegacyEncoding {
    fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            LegacyEncoding::Latin1 | LegacyEncoding::Iso8859_1 => {
                Some(bytes.iter().map(|&b| b as char).collect())
            }
            LegacyEncoding::Cp1252 => bytes.iter().map(|&b| cp1252_char(b)).collect(),
        }
    }
}

/// Windows-1252 differs from Latin-1 only in 0x80..=0x9F; five of those
/// bytes are undefined.
fn cp1252_char(b: u8) -> Option<char> {
    const HIGH: [Option<char>; 32] = [
        Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'),
        Some('\u{201E}'), Some('\u{2026}'), Some('\u{2020}'), Some('\u{2021}'),
        Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'), Some('\u{2039}'),
        Some('\u{0152}'), None, Some('\u{017D}'), None,
        None, Some('\u{2018}'), Some('\u{2019}'), Some('\u{201C}'),
        Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'), Some('\u{2014}'),
        Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
        Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
    ];
    match b {
        0x80..=0x9F => HIGH[(b - 0x80) as usize],
        _ => Some(b as char),
    }
}

fn decode_text(bytes: &[u8], filename: &str) -> String {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return text.to_string();
    }
    for encoding in LEGACY_ENCODINGS {
        if let Some(text) = encoding.decode(bytes) {
            tracing::debug!("decoded '{}' as {:?}", filename, encoding);
            return text;
        }
    }
    format!(
        "Could not decode text from file '{}' - unsupported encoding or binary file",
        filename
    )
}

// ============ OOXML ============

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!("{} exceeds size limit", name)));
    }
    Ok(out)
}

/// Entry names with `prefix<N>.xml`, sorted by N.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    collect_text_runs(&xml, b"p")
}

fn extract_pptx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_entry(&mut archive, &name)?;
        let text = collect_text_runs(&xml, b"p")?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => shared_strings(&xml)?,
        Err(_) => Vec::new(),
    };
    let mut sheets = Vec::new();
    for name in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let xml = read_entry(&mut archive, &name)?;
        sheets.push(sheet_rows(&xml, &shared)?);
    }
    Ok(sheets.join("\n\n"))
}

/// Concatenate `<*:t>` text runs, starting a new line at each closing
/// `paragraph_tag` element.
fn collect_text_runs(xml: &[u8], paragraph_tag: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(t)) if in_text => {
                out.push_str(&t.unescape().unwrap_or_default());
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"t" {
                    in_text = false;
                } else if name.as_ref() == paragraph_tag && !out.is_empty() && !out.ends_with('\n')
                {
                    out.push('\n');
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// One line per row, cells separated by tabs. Shared-string cells are
/// resolved; numeric and inline values are kept verbatim.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut rows: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut shared_cell = false;
    let mut in_value = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"c" => {
                    shared_cell = e.attributes().flatten().any(|a| {
                        a.key.local_name().as_ref() == b"t" && a.value.as_ref() == b"s"
                    });
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_value => {
                let raw = t.unescape().unwrap_or_default();
                let value = raw.trim();
                if shared_cell {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        row.push(s.clone());
                    }
                } else if !value.is_empty() {
                    row.push(value.to_string());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => shared_cell = false,
                b"row" => {
                    if !row.is_empty() {
                        rows.push(row.join("\t"));
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn utf8_text_passes_through() {
        assert_eq!(extract("héllo wörld".as_bytes(), "notes.txt"), "héllo wörld");
    }

    #[test]
    fn invalid_utf8_falls_back_to_latin1() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        assert_eq!(extract(&bytes, "menu.csv"), "café");
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(file_extension("Report.PDF"), "pdf");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("README"), "");
    }

    #[test]
    fn cp1252_maps_smart_quotes_and_rejects_undefined_bytes() {
        assert_eq!(LegacyEncoding::Cp1252.decode(&[0x93, b'x', 0x94]).unwrap(), "\u{201C}x\u{201D}");
        assert!(LegacyEncoding::Cp1252.decode(&[0x81]).is_none());
    }

    #[test]
    fn garbage_pdf_becomes_placeholder() {
        let text = extract(b"definitely not a pdf", "scan.pdf");
        assert!(text.starts_with("Error extracting text from PDF 'scan.pdf'"));
    }

    #[test]
    fn docx_paragraphs_are_extracted() {
        let docx = zip_with(&[(
            "word/document.xml",
            "<?xml version=\"1.0\"?><w:document xmlns:w=\"x\"><w:body>\
             <w:p><w:r><w:t>First line</w:t></w:r></w:p>\
             <w:p><w:r><w:t>Second </w:t></w:r><w:r><w:t>line</w:t></w:r></w:p>\
             </w:body></w:document>",
        )]);
        assert_eq!(extract(&docx, "cv.docx"), "First line\nSecond line");
    }

    #[test]
    fn xlsx_rows_resolve_shared_strings() {
        let xlsx = zip_with(&[
            (
                "xl/sharedStrings.xml",
                "<sst><si><t>name</t></si><si><t>score</t></si><si><t>ada</t></si></sst>",
            ),
            (
                "xl/worksheets/sheet1.xml",
                "<worksheet><sheetData>\
                 <row><c t=\"s\"><v>0</v></c><c t=\"s\"><v>1</v></c></row>\
                 <row><c t=\"s\"><v>2</v></c><c><v>42</v></c></row>\
                 </sheetData></worksheet>",
            ),
        ]);
        assert_eq!(extract(&xlsx, "scores.xlsx"), "name\tscore\nada\t42");
    }

    #[test]
    fn broken_docx_falls_back_to_raw_text() {
        assert_eq!(extract(b"plain words", "fake.docx"), "plain words");
    }
}
