use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Url};
use tracing::debug;

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::models::{OaiBody, OaiResponse, Record, SetInfo, Verb};

/// Issues one OAI-PMH request and returns the parsed response envelope.
///
/// Implementations surface transport-level failures (connection refused,
/// non-success HTTP status, malformed XML) as
/// [`HarvestError::Transport`] and never inspect `<error>` children;
/// interpreting protocol errors is the driver's job.
#[async_trait]
pub trait Communicator: Send + Sync {
    /// Performs `verb` with the given query parameters.
    async fn request(
        &self,
        verb: Verb,
        params: &[(&str, &str)],
    ) -> Result<OaiResponse, HarvestError>;
}

/// HTTP client for OAI-PMH 2.0 repositories.
///
/// Requests are URL-encoded GETs with the verb in the `verb` query
/// parameter, optionally authenticated with HTTP basic auth.
///
/// # Examples
///
/// ```no_run
/// use demeter::clients::{Communicator, OaiHttpClient};
/// use demeter::models::Verb;
///
/// # async fn example() -> Result<(), demeter::HarvestError> {
/// let client = OaiHttpClient::new("https://repo.example.org/oai", None, None)?;
/// let response = client.request(Verb::Identify, &[]).await?;
/// println!("server clock: {}", response.response_date);
/// # Ok(())
/// # }
/// ```
pub struct OaiHttpClient {
    client: Client,
    base_url: Url,
    auth: Option<(String, Option<String>)>,
}

impl OaiHttpClient {
    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Transport`] if the URL is malformed or the
    /// HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        http_user: Option<&str>,
        http_pass: Option<&str>,
    ) -> Result<Self, HarvestError> {
        let base_url = Url::parse(base_url)
            .map_err(|_| HarvestError::Transport(format!("invalid repository URL: {}", base_url)))?;

        let client = Client::builder()
            .user_agent(concat!("demeter/", env!("CARGO_PKG_VERSION"), " (oai-pmh harvester)"))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| HarvestError::Transport(e.to_string()))?;

        let auth = http_user.map(|u| (u.to_string(), http_pass.map(str::to_string)));

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Creates a client from a harvest configuration.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, HarvestError> {
        Self::new(
            &config.url,
            config.http_user.as_deref(),
            config.http_pass.as_deref(),
        )
    }
}

#[async_trait]
impl Communicator for OaiHttpClient {
    async fn request(
        &self,
        verb: Verb,
        params: &[(&str, &str)],
    ) -> Result<OaiResponse, HarvestError> {
        let mut url = self.base_url.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("verb", verb.as_str());
            for (name, value) in params {
                pairs.append_pair(name, value);
            }
        }
        debug!(%url, "issuing {} request", verb);

        let mut request = self.client.get(url);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, pass.as_deref());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Transport(format!(
                "HTTP {} from {} request",
                status.as_u16(),
                verb
            )));
        }

        let body = response.text().await?;
        parse_response(&body)
    }
}

/// Fetches every set the repository exposes, chaining `ListSets`
/// resumption tokens. Not used by the harvest driver itself.
pub async fn list_sets<C>(comm: &C) -> Result<Vec<SetInfo>, HarvestError>
where
    C: Communicator + ?Sized,
{
    let mut all = Vec::new();
    let mut token: Option<String> = None;
    loop {
        let response = match &token {
            Some(t) => {
                comm.request(Verb::ListSets, &[("resumptionToken", t.as_str())])
                    .await?
            }
            None => comm.request(Verb::ListSets, &[]).await?,
        };
        match response.body {
            OaiBody::Error { code, message } => {
                return Err(HarvestError::Protocol { code, message });
            }
            OaiBody::ListSets {
                sets,
                resumption_token,
            } => {
                all.extend(sets);
                token = resumption_token.filter(|t| !t.is_empty());
                if token.is_none() {
                    break;
                }
            }
            _ => {
                return Err(malformed("ListSets response carried a different payload"));
            }
        }
    }
    Ok(all)
}

fn malformed(detail: impl std::fmt::Display) -> HarvestError {
    HarvestError::Transport(format!("malformed OAI-PMH response: {}", detail))
}

/// Parses an OAI-PMH 2.0 response body into the tagged envelope.
///
/// Element names are matched by local name, so namespace prefixes do not
/// matter. `<record>` subtrees are captured verbatim; only their
/// `<header>` identifier and datestamp are lifted out.
pub fn parse_response(xml: &str) -> Result<OaiResponse, HarvestError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response_date: Option<String> = None;
    let mut error_code: Option<String> = None;
    let mut error_message = String::new();
    let mut identify_seen = false;
    let mut granularity: Option<String> = None;
    let mut list_records_seen = false;
    let mut records: Vec<Record> = Vec::new();
    let mut list_sets_seen = false;
    let mut sets: Vec<SetInfo> = Vec::new();
    let mut current_set: Option<(Option<String>, Option<String>)> = None;
    let mut resumption_token: Option<String> = None;

    // Stack of open element local names; the element containing a text
    // event is always the last entry.
    let mut path: Vec<String> = Vec::new();

    loop {
        let event_start = reader.buffer_position() as usize;
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();

                if name == "record" && path.last().map(String::as_str) == Some("ListRecords") {
                    // Consume the whole subtree and keep its raw form.
                    reader.read_to_end(e.name()).map_err(malformed)?;
                    let event_end = reader.buffer_position() as usize;
                    let raw = xml[event_start..event_end].trim().to_string();
                    let (identifier, datestamp) = parse_record_header(&raw)?;
                    records.push(Record {
                        raw,
                        identifier,
                        datestamp,
                    });
                    continue;
                }

                match name.as_str() {
                    "error" => {
                        let code = e
                            .try_get_attribute("code")
                            .map_err(malformed)?
                            .map(|a| a.unescape_value().map(|v| v.into_owned()))
                            .transpose()
                            .map_err(malformed)?
                            .unwrap_or_default();
                        error_code = Some(code);
                    }
                    "Identify" => identify_seen = true,
                    "ListRecords" => list_records_seen = true,
                    "ListSets" => list_sets_seen = true,
                    "set" if path.last().map(String::as_str) == Some("ListSets") => {
                        current_set = Some((None, None));
                    }
                    _ => {}
                }
                path.push(name);
            }
            Event::End(_) => {
                if path.pop().as_deref() == Some("set") {
                    if let Some((spec, set_name)) = current_set.take() {
                        sets.push(SetInfo {
                            spec: spec.unwrap_or_default(),
                            name: set_name.unwrap_or_default(),
                        });
                    }
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(malformed)?.into_owned();
                dispatch_text(
                    &path,
                    text,
                    &mut response_date,
                    &mut error_code,
                    &mut error_message,
                    &mut granularity,
                    &mut resumption_token,
                    &mut current_set,
                );
            }
            Event::CData(t) => {
                let text = String::from_utf8_lossy(&t.into_inner()).into_owned();
                dispatch_text(
                    &path,
                    text,
                    &mut response_date,
                    &mut error_code,
                    &mut error_message,
                    &mut granularity,
                    &mut resumption_token,
                    &mut current_set,
                );
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let response_date = response_date.ok_or_else(|| malformed("missing responseDate"))?;

    let body = if let Some(code) = error_code {
        OaiBody::Error {
            code,
            message: error_message,
        }
    } else if identify_seen {
        OaiBody::Identify { granularity }
    } else if list_records_seen {
        OaiBody::ListRecords {
            records,
            resumption_token,
        }
    } else if list_sets_seen {
        OaiBody::ListSets {
            sets,
            resumption_token,
        }
    } else {
        return Err(malformed("no verb payload or error element"));
    };

    Ok(OaiResponse {
        response_date,
        body,
    })
}

/// Routes one text node to the slot its enclosing element fills.
#[allow(clippy::too_many_arguments)]
fn dispatch_text(
    path: &[String],
    text: String,
    response_date: &mut Option<String>,
    error_code: &mut Option<String>,
    error_message: &mut String,
    granularity: &mut Option<String>,
    resumption_token: &mut Option<String>,
    current_set: &mut Option<(Option<String>, Option<String>)>,
) {
    let containing = match path.last() {
        Some(name) => name.as_str(),
        None => return,
    };
    let parent = path
        .len()
        .checked_sub(2)
        .and_then(|i| path.get(i))
        .map(String::as_str);

    match (parent, containing) {
        (Some("OAI-PMH"), "responseDate") => *response_date = Some(text),
        (Some("OAI-PMH"), "error") if error_code.is_some() => *error_message = text,
        (Some("Identify"), "granularity") => *granularity = Some(text),
        (Some("ListRecords"), "resumptionToken") | (Some("ListSets"), "resumptionToken") => {
            *resumption_token = Some(text);
        }
        (Some("set"), "setSpec") => {
            if let Some((spec, _)) = current_set {
                *spec = Some(text);
            }
        }
        (Some("set"), "setName") => {
            if let Some((_, name)) = current_set {
                *name = Some(text);
            }
        }
        _ => {}
    }
}

/// Lifts `<header>` identifier and datestamp out of one raw record subtree.
fn parse_record_header(raw: &str) -> Result<(Option<String>, Option<String>), HarvestError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut identifier: Option<String> = None;
    let mut datestamp: Option<String> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let in_header = path.len() >= 2 && path[path.len() - 2] == "header";
                if in_header {
                    match path.last().map(String::as_str) {
                        Some("identifier") => {
                            identifier = Some(t.unescape().map_err(malformed)?.into_owned());
                        }
                        Some("datestamp") => {
                            datestamp = Some(t.unescape().map_err(malformed)?.into_owned());
                        }
                        _ => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((identifier, datestamp))
}
