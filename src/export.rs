//! Downloads of the session user's expenses as CSV, JSON, XML, an Excel
//! spreadsheet or a printable HTML report.

use std::{fmt::Write, str::FromStr};

use axum::{
    http::{HeaderValue, header},
    response::IntoResponse,
};
use maud::{DOCTYPE, Markup, html};
use serde_json::json;
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error,
    auth::User,
    currency,
    expense::{Expense, ExpenseFilter, ExpenseView, list_expenses_for_user, session_user},
    gateway::Gateway,
    router::{Reply, RequestContext},
    timezone::local_today,
};

/// The file formats expenses can be exported as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Comma-separated values with a header row.
    Csv,
    /// A JSON document with the user, totals and expenses.
    Json,
    /// An XML document with the same content as [ExportFormat::Json].
    Xml,
    /// An SpreadsheetML 2003 workbook, which Excel and LibreOffice open natively.
    Excel,
    /// An HTML report laid out for the browser's print-to-PDF.
    Pdf,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "excel" | "xls" => Ok(Self::Excel),
            "pdf" => Ok(Self::Pdf),
            _ => Err(Error::NotFound),
        }
    }
}

impl ExportFormat {
    /// The `Content-Type` header value for the format.
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
            Self::Xml => "application/xml; charset=utf-8",
            Self::Excel => "application/vnd.ms-excel",
            Self::Pdf => "text/html; charset=utf-8",
        }
    }

    /// The file extension used in the download's file name.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Excel => "xls",
            Self::Pdf => "html",
        }
    }
}

/// Everything that goes into an export.
#[derive(Debug, Clone)]
pub struct ExportData {
    /// The user whose expenses are exported.
    pub user: User,
    /// The user's expenses, newest first.
    pub expenses: Vec<ExpenseView>,
    /// When the export was made.
    pub exported_at: OffsetDateTime,
    /// The day the export was made in the configured timezone, used in the file name.
    pub export_date: Date,
}

impl ExportData {
    /// The sum of the exported amounts, rounded to cents.
    pub fn total(&self) -> f64 {
        let total: f64 = self.expenses.iter().map(|expense| expense.amount).sum();
        (total * 100.0).round() / 100.0
    }

    /// The download's file name, e.g. "expenses_2024-05-01.csv".
    pub fn file_name(&self, format: ExportFormat) -> String {
        format!("expenses_{}.{}", self.export_date, format.extension())
    }
}

/// Render `data` in `format`.
///
/// # Errors
/// Returns [Error::ExportError] if the document could not be written.
pub fn render_export(format: ExportFormat, data: &ExportData) -> Result<Vec<u8>, Error> {
    match format {
        ExportFormat::Csv => render_csv(data),
        ExportFormat::Json => render_json(data),
        ExportFormat::Xml => render_xml(data).map(String::into_bytes),
        ExportFormat::Excel => render_spreadsheet(data).map(String::into_bytes),
        ExportFormat::Pdf => Ok(render_report(data).into_string().into_bytes()),
    }
}

fn render_csv(data: &ExportData) -> Result<Vec<u8>, Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let export_error = |error: csv::Error| Error::ExportError(error.to_string());

    writer
        .write_record(["id", "date", "category", "description", "amount"])
        .map_err(export_error)?;

    for expense in &data.expenses {
        writer
            .write_record([
                expense.id.to_string(),
                expense.date.to_string(),
                expense.category.name.clone(),
                expense.description.clone(),
                format!("{:.2}", expense.amount),
            ])
            .map_err(export_error)?;
    }

    writer
        .into_inner()
        .map_err(|error| Error::ExportError(error.to_string()))
}

fn render_json(data: &ExportData) -> Result<Vec<u8>, Error> {
    let bundle = json!({
        "exported_at": data.exported_at
            .format(&time::format_description::well_known::Rfc3339)
            .map_err(|error| Error::ExportError(error.to_string()))?,
        "user": {
            "name": data.user.name,
            "email": data.user.email,
        },
        "currency": data.user.currency,
        "count": data.expenses.len(),
        "total": data.total(),
        "expenses": data.expenses,
    });

    Ok(serde_json::to_vec_pretty(&bundle)?)
}

/// Escape the characters that are not allowed in XML text and attribute values.
fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());

    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            // Control characters other than tab and newlines are not valid XML 1.0.
            c if c.is_control() && !matches!(c, '\t' | '\n' | '\r') => {}
            c => escaped.push(c),
        }
    }

    escaped
}

fn render_xml(data: &ExportData) -> Result<String, Error> {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let write_error = |error: std::fmt::Error| Error::ExportError(error.to_string());

    writeln!(
        xml,
        "<expenses user=\"{}\" currency=\"{}\" count=\"{}\" total=\"{:.2}\">",
        escape_xml(&data.user.name),
        escape_xml(&data.user.currency),
        data.expenses.len(),
        data.total()
    )
    .map_err(write_error)?;

    for expense in &data.expenses {
        writeln!(
            xml,
            "  <expense id=\"{}\">\n    <date>{}</date>\n    <category slug=\"{}\">{}</category>\n    \
             <description>{}</description>\n    <amount>{:.2}</amount>\n  </expense>",
            expense.id,
            expense.date,
            escape_xml(&expense.category.slug),
            escape_xml(&expense.category.name),
            escape_xml(&expense.description),
            expense.amount
        )
        .map_err(write_error)?;
    }

    xml.push_str("</expenses>\n");

    Ok(xml)
}

fn render_spreadsheet(data: &ExportData) -> Result<String, Error> {
    let write_error = |error: std::fmt::Error| Error::ExportError(error.to_string());
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <?mso-application progid=\"Excel.Sheet\"?>\n\
         <Workbook xmlns=\"urn:schemas-microsoft-com:office:spreadsheet\" \
         xmlns:ss=\"urn:schemas-microsoft-com:office:spreadsheet\">\n\
         <Worksheet ss:Name=\"Expenses\">\n<Table>\n",
    );

    xml.push_str("<Row>");
    for heading in ["ID", "Date", "Category", "Description", "Amount"] {
        write!(xml, "<Cell><Data ss:Type=\"String\">{heading}</Data></Cell>").map_err(write_error)?;
    }
    xml.push_str("</Row>\n");

    for expense in &data.expenses {
        writeln!(
            xml,
            "<Row><Cell><Data ss:Type=\"Number\">{}</Data></Cell>\
             <Cell><Data ss:Type=\"String\">{}</Data></Cell>\
             <Cell><Data ss:Type=\"String\">{}</Data></Cell>\
             <Cell><Data ss:Type=\"String\">{}</Data></Cell>\
             <Cell><Data ss:Type=\"Number\">{:.2}</Data></Cell></Row>",
            expense.id,
            expense.date,
            escape_xml(&expense.category.name),
            escape_xml(&expense.description),
            expense.amount
        )
        .map_err(write_error)?;
    }

    writeln!(
        xml,
        "<Row><Cell ss:Index=\"4\"><Data ss:Type=\"String\">Total</Data></Cell>\
         <Cell><Data ss:Type=\"Number\">{:.2}</Data></Cell></Row>",
        data.total()
    )
    .map_err(write_error)?;

    xml.push_str("</Table>\n</Worksheet>\n</Workbook>\n");

    Ok(xml)
}

const REPORT_STYLE: &str = "body { font-family: sans-serif; margin: 2rem; color: #111; } \
    table { width: 100%; border-collapse: collapse; } \
    th, td { padding: 0.4rem 0.6rem; border-bottom: 1px solid #ddd; text-align: left; } \
    td.amount, th.amount { text-align: right; } \
    tfoot td { font-weight: bold; border-top: 2px solid #111; } \
    @media print { body { margin: 0; } }";

fn render_report(data: &ExportData) -> Markup {
    let code = data.user.currency.as_str();

    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { "Expense report for " (data.user.name) }
                style { (REPORT_STYLE) }
            }
            body {
                h1 { "Expense report" }
                p { (data.user.name) " · exported " (data.export_date) " · " (data.expenses.len()) " expenses" }
                table {
                    thead {
                        tr {
                            th { "Date" }
                            th { "Category" }
                            th { "Description" }
                            th class="amount" { "Amount" }
                        }
                    }
                    tbody {
                        @for expense in &data.expenses {
                            tr {
                                td { (expense.date) }
                                td { (expense.category.icon) " " (expense.category.name) }
                                td { (expense.description) }
                                td class="amount" { (currency::format(expense.amount, code)) }
                            }
                        }
                    }
                    tfoot {
                        tr {
                            td colspan="3" { "Total" }
                            td class="amount" { (currency::format(data.total(), code)) }
                        }
                    }
                }
            }
        }
    }
}

/// A route handler that downloads all of the session user's expenses in the
/// format named by the `format` path parameter.
///
/// Unknown formats are not found.
pub fn export_expenses(state: &AppState, context: &mut RequestContext) -> Result<Reply, Error> {
    let format: ExportFormat = context.param("format")?;
    let export_date = local_today(&state.config.local_timezone)?;

    let data = {
        let connection = state.db();
        let user = session_user(context, &Gateway::new(&connection, &context.queries))?;
        let expenses = list_expenses_for_user(
            user.id,
            &ExpenseFilter::default(),
            &user.currency,
            &Gateway::<Expense>::new(&connection, &context.queries),
        )?;

        ExportData {
            user,
            expenses,
            exported_at: OffsetDateTime::now_utc(),
            export_date,
        }
    };

    let body = render_export(format, &data)?;
    let disposition = format!("attachment; filename=\"{}\"", data.file_name(format));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|error| Error::ExportError(error.to_string()))?;

    tracing::info!(
        "user {} exported {} expenses as {format:?}",
        data.user.id,
        data.expenses.len()
    );

    Ok(Reply::File(
        (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            body,
        )
            .into_response(),
    ))
}
