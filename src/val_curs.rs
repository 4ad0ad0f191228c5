use serde::Deserialize;

/// One `<Record>` of the `XML_dynamic.asp` answer.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Record {
    #[serde(rename = "@Date")]
    pub date: String,
    #[serde(rename = "@Id", default)]
    pub id: Option<String>,
    #[serde(rename = "Value", default)]
    pub value: Option<String>,
}

/// Daily rates of one currency over a date range.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ValCurs {
    #[serde(rename = "@ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Record", default)]
    pub records: Vec<Record>,
}

/// One `<Item>` of the `XML_valFull.asp` catalog.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Item {
    #[serde(rename = "@ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "EngName", default)]
    pub eng_name: Option<String>,
    #[serde(rename = "Nominal", default)]
    pub nominal: Option<String>,
    #[serde(rename = "ISO_Char_Code", default)]
    pub iso_char_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Valuta {
    #[serde(rename = "Item", default)]
    pub items: Vec<Item>,
}

/// Element text with surrounding blanks removed, `None` when nothing is left.
pub fn text(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
