use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use linkprims_param::{FieldId, Parameter, ParameterDef};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct ParametersOutput<'a> {
    source: &'a str,
    count: usize,
    parameters: Vec<ParameterDef>,
}

/// Print whole parameter rows. `raw` is what [`OutputFormat::Raw`] writes.
pub fn print_parameters(parameters: &[Parameter], source: &str, raw: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = ParametersOutput {
                source,
                count: parameters.len(),
                parameters: parameters.iter().map(Parameter::to_def).collect(),
            };
            println!("{}", serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string()));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["INDEX", "NAME", "KIND", "FLAGS", "RAM", "ROM", "DEFAULT", "MIN", "MAX"]);
            for parameter in parameters {
                let mut row = Vec::with_capacity(9);
                for field in [FieldId::Index, FieldId::Name, FieldId::Kind, FieldId::Flags] {
                    row.push(parameter.get_field(field).to_string());
                }
                row.push(optional(parameter.ram.as_ref().map(|v| v.to_text())));
                row.push(optional(parameter.eeprom.as_ref().map(|v| v.to_text())));
                row.push(parameter.default.to_text());
                if parameter.has_range {
                    row.push(parameter.min.to_text());
                    row.push(parameter.max.to_text());
                } else {
                    row.extend(["-".to_string(), "-".to_string()]);
                }
                table.add_row(row);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for parameter in parameters {
                println!(
                    "index={} name={} kind={} flags={} ram={} rom={}",
                    parameter.get_field(FieldId::Index),
                    parameter.get_field(FieldId::Name),
                    parameter.kind,
                    parameter.flags,
                    parameter.get_field(FieldId::Ram),
                    parameter.get_field(FieldId::Rom),
                );
            }
        }
        OutputFormat::Raw => print_raw(raw),
    }
}

#[derive(Serialize)]
struct SampleValue {
    index: Option<u8>,
    name: Option<String>,
    field: String,
    value: String,
}

#[derive(Serialize)]
struct SampleOutput {
    sample: usize,
    timestamp: String,
    values: Vec<SampleValue>,
}

/// Print one polled reply: the selected fields of each parameter.
pub fn print_sample(sample: usize, parameters: &[Parameter], fields: &[FieldId], raw: &[u8], format: OutputFormat) {
    let values: Vec<SampleValue> = parameters
        .iter()
        .flat_map(move |parameter| {
            fields.iter().map(move |&field| SampleValue {
                index: parameter.index,
                name: parameter.name.clone(),
                field: field.name().to_string(),
                value: parameter.get_field(field).to_string(),
            })
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let out = SampleOutput {
                sample,
                timestamp: now_unix_millis(),
                values,
            };
            println!("{}", serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string()));
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SAMPLE", "INDEX", "NAME", "FIELD", "VALUE"]);
            for value in values {
                table.add_row(vec![
                    sample.to_string(),
                    value.index.map_or_else(|| "-".to_string(), |i| i.to_string()),
                    optional(value.name),
                    value.field,
                    value.value,
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let line: Vec<String> = values
                .iter()
                .map(|v| format!("{}.{}={}", v.name.as_deref().unwrap_or("?"), v.field, v.value))
                .collect();
            println!("sample={sample} {}", line.join(" "));
        }
        OutputFormat::Raw => print_raw(raw),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn optional(text: Option<String>) -> String {
    text.unwrap_or_else(|| "-".to_string())
}

fn now_unix_millis() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
