use chrono::{DateTime, NaiveDate, NaiveDateTime};
use common::domain::CandidateCredit;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Key of the record list inside a queue message
const CREDIT_LIST_KEY: &str = "creditos";

/// Lowercased wire name of each record field and its English alias.
const RECORD_FIELDS: &[(&str, &str)] = &[
    ("numerocredito", "businesskey"),
    ("numeronfse", "documentreference"),
    ("dataconstituicao", "constitutiondate"),
    ("valorissqn", "taxamount"),
    ("tipocredito", "category"),
    ("simplesnacional", "simplifiedregime"),
    ("aliquota", "rate"),
    ("valorfaturado", "billedamount"),
    ("valordeducao", "deductionamount"),
    ("basecalculo", "taxbase"),
];

/// Candidate credits decoded from one queue message, in wire order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreditBatch {
    pub credits: Vec<CandidateCredit>,
}

impl CreditBatch {
    pub fn len(&self) -> usize {
        self.credits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credits.is_empty()
    }
}

/// The whole message is unusable. Individual bad values inside a well-formed record are not
/// decode errors; they surface later as validation failures.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    MalformedJson(#[source] serde_json::Error),

    #[error("payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("`creditos` must be an array, got {0}")]
    CreditListNotArray(&'static str),

    #[error("record {index} must be a JSON object, got {kind}")]
    RecordNotAnObject { index: usize, kind: &'static str },

    #[error("record {index} names field `{field}` more than once")]
    DuplicateField { index: usize, field: String },

    #[error("record {index} has a field of the wrong type: {source}")]
    InvalidRecord {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Keys arrive already mapped onto the lowercase wire names (see [`canonical_fields`]).
/// Absent or null fields fall back to defaults the validator will reject.
#[derive(Debug, Deserialize)]
struct CreditRecordWire {
    #[serde(rename = "numerocredito", default)]
    numero_credito: Option<String>,

    #[serde(rename = "numeronfse", default)]
    numero_nfse: Option<String>,

    #[serde(
        rename = "dataconstituicao",
        default,
        deserialize_with = "deserialize_calendar_date"
    )]
    data_constituicao: Option<NaiveDate>,

    #[serde(rename = "valorissqn", default)]
    valor_issqn: Option<Decimal>,

    #[serde(rename = "tipocredito", default)]
    tipo_credito: Option<String>,

    #[serde(rename = "simplesnacional", default)]
    simples_nacional: Option<bool>,

    #[serde(rename = "aliquota", default)]
    aliquota: Option<Decimal>,

    #[serde(rename = "valorfaturado", default)]
    valor_faturado: Option<Decimal>,

    #[serde(rename = "valordeducao", default)]
    valor_deducao: Option<Decimal>,

    #[serde(rename = "basecalculo", default)]
    base_calculo: Option<Decimal>,
}

impl From<CreditRecordWire> for CandidateCredit {
    fn from(wire: CreditRecordWire) -> Self {
        CandidateCredit {
            business_key: wire.numero_credito.unwrap_or_default(),
            document_reference: wire.numero_nfse.unwrap_or_default(),
            constitution_date: wire.data_constituicao.unwrap_or(NaiveDate::MIN),
            tax_amount: wire.valor_issqn.unwrap_or_default(),
            category: wire.tipo_credito.unwrap_or_default(),
            simplified_regime: wire.simples_nacional.unwrap_or_default(),
            rate: wire.aliquota.unwrap_or_default(),
            billed_amount: wire.valor_faturado.unwrap_or_default(),
            deduction_amount: wire.valor_deducao.unwrap_or_default(),
            tax_base: wire.base_calculo.unwrap_or_default(),
        }
    }
}

/// Accepts `YYYY-MM-DD`, a naive date-time or an RFC 3339 timestamp and keeps the date part.
fn deserialize_calendar_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Some(datetime.date()));
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(datetime.date_naive()));
    }

    Err(serde::de::Error::custom(format!(
        "invalid calendar date `{raw}`"
    )))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Maps every known key, in any case or under its English alias, onto its lowercase wire
/// name. Unknown keys are dropped. Naming one field twice fails the record.
fn canonical_fields(
    index: usize,
    record: Map<String, Value>,
) -> Result<Map<String, Value>, DecodeError> {
    let mut fields = Map::new();
    for (key, value) in record {
        let lowered = key.to_lowercase();
        let Some((wire_name, _)) = RECORD_FIELDS
            .iter()
            .find(|(wire_name, alias)| lowered == *wire_name || lowered == *alias)
        else {
            continue;
        };

        if fields.insert(wire_name.to_string(), value).is_some() {
            return Err(DecodeError::DuplicateField { index, field: key });
        }
    }
    Ok(fields)
}

/// Decode a queue message into a batch of candidate credits.
///
/// A message without a `creditos` list decodes to an empty batch.
pub fn decode_batch(payload: &[u8]) -> Result<CreditBatch, DecodeError> {
    let root: Value = serde_json::from_slice(payload).map_err(DecodeError::MalformedJson)?;

    let Value::Object(root) = root else {
        return Err(DecodeError::NotAnObject(kind_of(&root)));
    };

    let list = root
        .into_iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(CREDIT_LIST_KEY))
        .map(|(_, value)| value);

    let records = match list {
        None | Some(Value::Null) => return Ok(CreditBatch::default()),
        Some(Value::Array(records)) => records,
        Some(other) => return Err(DecodeError::CreditListNotArray(kind_of(&other))),
    };

    let mut credits = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        let Value::Object(fields) = record else {
            return Err(DecodeError::RecordNotAnObject {
                index,
                kind: kind_of(&record),
            });
        };

        let fields = canonical_fields(index, fields)?;
        let wire: CreditRecordWire = serde_json::from_value(Value::Object(fields))
            .map_err(|source| DecodeError::InvalidRecord { index, source })?;
        credits.push(wire.into());
    }

    Ok(CreditBatch { credits })
}
