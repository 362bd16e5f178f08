use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{DataGoError, Result};

/// Result codes the registry treats as success.
const SUCCESS_CODES: [&str; 2] = ["00", "INFO-00"];
/// Result codes meaning "query matched nothing" rather than failure.
const NO_DATA_CODES: [&str; 2] = ["03", "INFO-03"];

/// One registered-candidate row. Field names follow the registry schema
/// (`jdName` is the party, `sdName`/`sggName` the region pair).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRow {
    pub name: String,
    #[serde(default)]
    pub jd_name: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub career1: Option<String>,
    #[serde(default)]
    pub career2: Option<String>,
    #[serde(default)]
    pub sd_name: Option<String>,
    #[serde(default)]
    pub sgg_name: Option<String>,
}

impl CandidateRow {
    fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let name = fields.get("name")?.trim().to_string();
        if name.is_empty() {
            return None;
        }
        let pick = |key: &str| {
            fields
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Some(Self {
            name,
            jd_name: pick("jdName"),
            gender: pick("gender"),
            birthday: pick("birthday"),
            job: pick("job"),
            career1: pick("career1"),
            career2: pick("career2"),
            sd_name: pick("sdName"),
            sgg_name: pick("sggName"),
        })
    }

    /// Combined career summary from the two registry career fields.
    pub fn career_summary(&self) -> Option<String> {
        let parts: Vec<&str> = [self.career1.as_deref(), self.career2.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" / "))
        }
    }
}

/// Query scope for a registry lookup; also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateQuery {
    /// Election id, e.g. "20260603".
    pub sg_id: String,
    /// Candidate type code (office family), e.g. "3" for metro chiefs.
    pub sg_typecode: String,
    pub sd_name: Option<String>,
    pub sgg_name: Option<String>,
}

fn check_result_code(code: Option<&str>, msg: Option<&str>) -> Result<()> {
    let code = match code {
        Some(c) if !c.is_empty() => c,
        _ => return Ok(()),
    };
    if SUCCESS_CODES.contains(&code) {
        return Ok(());
    }
    if NO_DATA_CODES.contains(&code) {
        return Err(DataGoError::NoData);
    }
    Err(DataGoError::ResultCode {
        code: code.to_string(),
        message: msg.unwrap_or("").to_string(),
    })
}

/// Parse a registry response body in either XML or JSON shape.
pub fn parse_candidate_rows(raw: &str) -> Result<Vec<CandidateRow>> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        parse_json_rows(raw)
    } else {
        parse_xml_rows(raw)
    }
}

fn parse_xml_rows(raw: &str) -> Result<Vec<CandidateRow>> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut rows = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut tag_stack: Vec<String> = Vec::new();
    let mut result_code: Option<String> = None;
    let mut result_msg: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tag == "item" {
                    current = Some(HashMap::new());
                }
                tag_stack.push(tag);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DataGoError::Parse(e.to_string()))?
                    .into_owned();
                if let Some(tag) = tag_stack.last() {
                    match tag.as_str() {
                        "resultCode" => result_code = Some(text),
                        "resultMsg" => result_msg = Some(text),
                        _ => {
                            if let Some(fields) = current.as_mut() {
                                fields.insert(tag.clone(), text);
                            }
                        }
                    }
                }
            }
            Ok(Event::End(e)) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if tag == "item" {
                    if let Some(fields) = current.take() {
                        if let Some(row) = CandidateRow::from_fields(&fields) {
                            rows.push(row);
                        }
                    }
                }
                tag_stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DataGoError::Parse(e.to_string())),
            Ok(_) => {}
        }
    }

    check_result_code(result_code.as_deref(), result_msg.as_deref())?;
    Ok(rows)
}

fn parse_json_rows(raw: &str) -> Result<Vec<CandidateRow>> {
    let payload: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DataGoError::Parse(e.to_string()))?;

    if let Some(list) = payload.as_array() {
        return Ok(list.iter().filter_map(row_from_json).collect());
    }

    let header = &payload["response"]["header"];
    check_result_code(header["resultCode"].as_str(), header["resultMsg"].as_str())?;

    let mut cursor = &payload;
    for key in ["response", "body", "items"] {
        if cursor.get(key).is_some() {
            cursor = &cursor[key];
        }
    }
    if cursor.get("item").is_some() {
        cursor = &cursor["item"];
    }

    let rows = match cursor {
        serde_json::Value::Array(items) => items.iter().filter_map(row_from_json).collect(),
        serde_json::Value::Object(_) => row_from_json(cursor).into_iter().collect(),
        _ => Vec::new(),
    };
    Ok(rows)
}

fn row_from_json(value: &serde_json::Value) -> Option<CandidateRow> {
    let obj = value.as_object()?;
    let fields: HashMap<String, String> = obj
        .iter()
        .filter_map(|(k, v)| {
            let text = match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((k.clone(), text))
        })
        .collect();
    CandidateRow::from_fields(&fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_xml_items() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <response>
              <header><resultCode>INFO-00</resultCode><resultMsg>NORMAL SERVICE</resultMsg></header>
              <body><items>
                <item><name>김철수</name><jdName>미래당</jdName><gender>남</gender></item>
                <item><name>이영희</name><jdName>혁신당</jdName></item>
              </items></body>
            </response>"#;
        let rows = parse_candidate_rows(xml).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "김철수");
        assert_eq!(rows[0].jd_name.as_deref(), Some("미래당"));
    }

    #[test]
    fn parses_json_items() {
        let json = r#"{"response":{"header":{"resultCode":"INFO-00","resultMsg":"OK"},
            "body":{"items":{"item":[{"name":"김철수","jdName":"미래당"}]}}}}"#;
        let rows = parse_candidate_rows(json).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "김철수");
    }

    #[test]
    fn no_data_code_maps_to_no_data_error() {
        let xml = r#"<response><header><resultCode>INFO-03</resultCode><resultMsg>NODATA</resultMsg></header></response>"#;
        assert!(matches!(parse_candidate_rows(xml), Err(DataGoError::NoData)));
    }

    #[test]
    fn error_code_is_surfaced() {
        let xml = r#"<response><header><resultCode>ERROR-500</resultCode><resultMsg>SERVER ERROR</resultMsg></header></response>"#;
        match parse_candidate_rows(xml) {
            Err(DataGoError::ResultCode { code, .. }) => assert_eq!(code, "ERROR-500"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn career_summary_joins_both_fields() {
        let row = CandidateRow {
            name: "김철수".into(),
            career1: Some("현 시의원".into()),
            career2: Some("전 구청장".into()),
            ..Default::default()
        };
        assert_eq!(row.career_summary().as_deref(), Some("현 시의원 / 전 구청장"));
    }
}
