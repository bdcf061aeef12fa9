//! Message rendering: subject, plain text, HTML and the Teams card.

use alerts_core::config::BrandingConfig;
use alerts_core::types::Event;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};

const BRAND_COLOR: &str = "2EA9DE";
const HEADER_COLOR: &str = "#0B4877";

/// Which inline logos the HTML body should reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogoRefs {
    pub company: bool,
    pub st_company: bool,
}

/// Turns events into message bodies using the configured branding.
///
/// Timestamps are shown in the branding timezone.
#[derive(Debug, Clone)]
pub struct MessageRenderer {
    branding: BrandingConfig,
    tz: Tz,
}

impl MessageRenderer {
    pub fn new(branding: BrandingConfig) -> Self {
        let tz = branding.tz().unwrap_or_else(|e| {
            tracing::warn!("{e}, rendering timestamps in UTC");
            Tz::UTC
        });
        Self { branding, tz }
    }

    /// Same branding with a different event type display name.
    pub fn with_event_type_name(mut self, name: impl Into<String>) -> Self {
        self.branding.event_type_name = name.into();
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn branding(&self) -> &BrandingConfig {
        &self.branding
    }

    /// `"<prefix> | <type name> Event: <event name>"`
    pub fn subject(&self, event: &Event) -> String {
        format!(
            "{} | {} Event: {}",
            self.branding.subject_prefix, self.branding.event_type_name, event.name
        )
    }

    /// Link to the event in the operations portal, when a base URL is set.
    pub fn event_link(&self, event: &Event) -> Option<String> {
        let base = self.branding.event_link_base.as_deref()?.trim();
        if base.is_empty() {
            return None;
        }
        Some(format!("{}/{}", base.trim_end_matches('/'), event.id))
    }

    /// Display rows: id, name, creation time, then the extra query columns.
    fn fields(&self, event: &Event) -> Vec<(String, String)> {
        let mut fields = vec![
            ("Id".to_string(), event.id.clone()),
            ("Event Name".to_string(), event.name.clone()),
            (
                "Created At".to_string(),
                format_timestamp(&event.created_at, self.tz),
            ),
        ];
        fields.extend(
            event
                .extra
                .iter()
                .map(|(col, value)| (column_title(col), value.clone())),
        );
        fields
    }

    pub fn plain_text(&self, event: &Event, now: DateTime<Utc>) -> String {
        let mut text = format!(
            "{} | {}\n\n{} event requires attention:\n",
            self.branding.subject_prefix,
            format_timestamp(&now, self.tz),
            self.branding.event_type_name
        );
        if let Some(link) = self.event_link(event) {
            text.push_str(&format!("\n   Link: {link}"));
        }
        for (name, value) in self.fields(event) {
            text.push_str(&format!("\n   {name}: {value}"));
        }
        text.push_str(&format!(
            "\n\n---\nThis is an automated message from {}.",
            self.branding.company_name
        ));
        if let Some(contact) = &self.branding.contact_email {
            text.push_str(&format!(
                "\nIf you have questions about this alert, please contact {contact}."
            ));
        }
        text
    }

    pub fn html(&self, event: &Event, now: DateTime<Utc>, logos: LogoRefs) -> String {
        let company = escape_html(&self.branding.company_name);
        let mut logos_html = String::new();
        if logos.company {
            logos_html.push_str(&format!(
                r#"<img src="cid:company_logo" alt="{company} logo" style="max-height:50px; margin-right:15px; vertical-align:middle;">"#
            ));
        }
        if logos.st_company {
            logos_html.push_str(
                r#"<img src="cid:st_company_logo" alt="ST logo" style="max-height:45px; vertical-align:middle;">"#,
            );
        }

        let link = self.event_link(event);
        let mut rows = String::new();
        for (name, value) in self.fields(event) {
            let value_html = match (&link, name.as_str()) {
                (Some(url), "Event Name") => format!(
                    r#"<strong><a href="{}" target="_blank">{}</a></strong>"#,
                    escape_html(url),
                    escape_html(&value)
                ),
                _ => escape_html(&value),
            };
            rows.push_str(&format!(
                "<tr><th>{}</th><td>{value_html}</td></tr>",
                escape_html(&name)
            ));
        }

        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<style>
  body {{ font-family: -apple-system, "Segoe UI", Roboto, Arial, sans-serif; background-color: #f9fafc; color: #333; margin: 0; }}
  .container {{ max-width: 900px; margin: 30px auto; background: #ffffff; border-radius: 12px; padding: 20px 40px; }}
  .header {{ background-color: {HEADER_COLOR}; color: white; padding: 15px 25px; border-radius: 12px 12px 0 0; }}
  .header h1 {{ margin: 0; font-size: 22px; }}
  .header p {{ margin: 0; font-size: 14px; color: #d7e7f5; }}
  table {{ width: 100%; border-collapse: collapse; margin: 20px 0; font-size: 14px; }}
  th {{ background-color: #f5f8fb; text-align: left; padding: 8px 10px; width: 30%; }}
  td {{ padding: 8px 10px; border-bottom: 1px solid #e0e6ed; }}
  a {{ color: #{BRAND_COLOR}; text-decoration: none; }}
  .footer {{ font-size: 12px; color: #888; text-align: center; padding: 10px; border-top: 1px solid #eee; }}
</style>
</head>
<body>
<div class="container">
  <div class="header">
    <div>{logos_html}</div>
    <h1>{type_name} Alert</h1>
    <p>{generated}</p>
  </div>
  <table>{rows}</table>
  <div class="footer">This is an automated alert generated by {company}.</div>
</div>
</body>
</html>
"#,
            type_name = escape_html(&self.branding.event_type_name),
            generated = escape_html(&format_run_time(&now, self.tz)),
        )
    }

    /// Office 365 connector MessageCard for the Teams webhook.
    pub fn teams_card(&self, event: &Event) -> Value {
        let facts: Vec<Value> = self
            .fields(event)
            .into_iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        let mut card = json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": BRAND_COLOR,
            "summary": self.subject(event),
            "title": self.subject(event),
            "sections": [
                {
                    "activityTitle": event.name,
                    "activitySubtitle": format_timestamp(&event.created_at, self.tz),
                    "facts": facts,
                    "markdown": true
                },
                { "text": format!("*Automated alert from {}*", self.branding.company_name) }
            ]
        });
        if let Some(link) = self.event_link(event) {
            card["potentialAction"] = json!([{
                "@type": "OpenUri",
                "name": "Open event",
                "targets": [{ "os": "default", "uri": link }]
            }]);
        }
        card
    }
}

/// `2025-10-29 08:30 EET`
pub fn format_timestamp(ts: &DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%Y-%m-%d %H:%M %Z").to_string()
}

/// `Wednesday, 29 October 2025 08:30 EET`
pub fn format_run_time(ts: &DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%A, %d %B %Y %H:%M %Z").to_string()
}

/// `created_at` → `Created At`
fn column_title(column: &str) -> String {
    column
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn renderer() -> MessageRenderer {
        MessageRenderer::new(BrandingConfig {
            company_name: "Prominence".into(),
            subject_prefix: "AlertDev".into(),
            event_type_name: "Hot Work".into(),
            event_link_base: Some("https://ops.example.com/events/".into()),
            contact_email: Some("data@example.com".into()),
            ..Default::default()
        })
    }

    fn event() -> Event {
        Event::new(
            "101",
            "Hot work <deck> & \"aft\"",
            Utc.with_ymd_and_hms(2025, 10, 29, 6, 30, 0).unwrap(),
        )
        .with_field("vessel_name", "MV Example")
    }

    #[test]
    fn test_subject_format() {
        let e = Event::new("1", "Welding on deck 3", Utc::now());
        assert_eq!(
            renderer().subject(&e),
            "AlertDev | Hot Work Event: Welding on deck 3"
        );
    }

    #[test]
    fn test_event_link_trims_trailing_slash() {
        assert_eq!(
            renderer().event_link(&event()).as_deref(),
            Some("https://ops.example.com/events/101")
        );
        let bare = MessageRenderer::new(BrandingConfig::default());
        assert!(bare.event_link(&event()).is_none());
    }

    #[test]
    fn test_plain_text_lists_fields_and_link() {
        let text = renderer().plain_text(&event(), Utc::now());
        assert!(text.contains("Link: https://ops.example.com/events/101"));
        assert!(text.contains("Created At: 2025-10-29 08:30 EET"));
        assert!(text.contains("Vessel Name: MV Example"));
        assert!(text.contains("contact data@example.com"));
    }

    #[test]
    fn test_html_escapes_values() {
        let html = renderer().html(&event(), Utc::now(), LogoRefs::default());
        assert!(html.contains("Hot work &lt;deck&gt; &amp; &quot;aft&quot;"));
        assert!(!html.contains("<deck>"));
        assert!(!html.contains("cid:"));
    }

    #[test]
    fn test_html_references_requested_logos() {
        let logos = LogoRefs {
            company: true,
            st_company: false,
        };
        let html = renderer().html(&event(), Utc::now(), logos);
        assert!(html.contains("cid:company_logo"));
        assert!(!html.contains("cid:st_company_logo"));
    }

    #[test]
    fn test_teams_card_shape() {
        let card = renderer().teams_card(&event());
        assert_eq!(card["@type"], "MessageCard");
        assert_eq!(card["themeColor"], "2EA9DE");
        assert_eq!(card["sections"][0]["facts"][0]["value"], "101");
        assert_eq!(
            card["potentialAction"][0]["targets"][0]["uri"],
            "https://ops.example.com/events/101"
        );
    }

    #[test]
    fn test_timestamps_follow_daylight_saving() {
        let athens = chrono_tz::Europe::Athens;
        let summer = Utc.with_ymd_and_hms(2025, 7, 15, 6, 30, 0).unwrap();
        let winter = Utc.with_ymd_and_hms(2025, 10, 27, 6, 30, 0).unwrap();
        assert_eq!(format_timestamp(&summer, athens), "2025-07-15 09:30 EEST");
        assert_eq!(format_timestamp(&winter, athens), "2025-10-27 08:30 EET");
        assert_eq!(
            format_run_time(&winter, athens),
            "Monday, 27 October 2025 08:30 EET"
        );
    }

    #[test]
    fn test_unknown_timezone_falls_back_to_utc() {
        let renderer = MessageRenderer::new(BrandingConfig {
            timezone: "Nowhere/Special".into(),
            ..Default::default()
        });
        assert_eq!(renderer.timezone(), Tz::UTC);
        let card = renderer.teams_card(&event());
        assert_eq!(card["sections"][0]["activitySubtitle"], "2025-10-29 06:30 UTC");
    }

    #[test]
    fn test_event_type_name_override() {
        let e = Event::new("1", "Welding", Utc::now());
        let renderer = renderer().with_event_type_name("Hot Work Permit");
        assert_eq!(renderer.subject(&e), "AlertDev | Hot Work Permit Event: Welding");
    }

    #[test]
    fn test_column_title() {
        assert_eq!(column_title("created_at"), "Created At");
        assert_eq!(column_title("status"), "Status");
    }
}
