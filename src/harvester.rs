use tracing::{debug, info};

use crate::clients::Communicator;
use crate::config::{GranularityPolicy, HarvestConfig};
use crate::error::HarvestError;
use crate::models::{Checkpoint, Granularity, IdentifyInfo, OaiBody, OaiResponse, Verb};
use crate::storage::{RecordWriter, StateManager};

/// Inputs resolved during Prepare, fixed for the rest of the run.
struct Plan {
    /// Lower bound: caller `from`, last-harvest marker, or checkpoint slot.
    start_date: Option<String>,
    /// The end boundary of this run: caller `until`, checkpoint slot, or
    /// the repository clock captured by `Identify`. Written to every
    /// checkpoint and, at Finalize, to the last-harvest marker.
    end_date: Option<String>,
    /// The `until` request parameter. Only a caller- or checkpoint-
    /// supplied bound is sent on the wire; a boundary derived from
    /// `Identify` in this run stays local.
    until_param: Option<String>,
    /// Ordered set filters; a single `None` means no set filter.
    sets: Vec<Option<String>>,
    /// Restored checkpoint, consumed by the set it belongs to.
    resume: Option<Checkpoint>,
}

/// Drives one OAI-PMH harvest run against one repository.
///
/// The life cycle is Prepare → Harvest → Finalize: resolve the effective
/// date window (resuming from a checkpoint if one exists), page through
/// `ListRecords` for each configured set while checkpointing after every
/// response, then advance the last-harvest marker and drop the checkpoint.
///
/// Collaborators are capability contracts so a test double is just a
/// second implementation. One instance drives one target; requests are
/// strictly sequential because the remote cursor tolerates only a single
/// request stream.
///
/// Resuming assumes an unchanged configuration: a checkpoint naming a set
/// that is no longer configured causes every configured set to be skipped
/// (Finalize still runs).
pub struct Harvester<C, W, S> {
    config: HarvestConfig,
    comm: C,
    writer: W,
    state: S,
    identify: Option<IdentifyInfo>,
    /// True while a checkpoint exists on stable storage.
    checkpoint_live: bool,
}

impl<C, W, S> Harvester<C, W, S>
where
    C: Communicator,
    W: RecordWriter,
    S: StateManager,
{
    pub fn new(config: HarvestConfig, comm: C, writer: W, state: S) -> Self {
        Self {
            config,
            comm,
            writer,
            state,
            identify: None,
            checkpoint_live: false,
        }
    }

    /// Runs the harvest to completion.
    ///
    /// # Errors
    ///
    /// Any [`HarvestError`]; the variant states whether the checkpoint
    /// survived, which decides whether a re-run resumes or restarts.
    pub async fn launch(&mut self) -> Result<(), HarvestError> {
        if self.config.long_running {
            // No process-wide execution cap exists to lift on this
            // platform; the flag records intent for hosts that have one.
            debug!("long-running operation requested");
        }
        info!(url = %self.config.url, "starting harvest");

        let Plan {
            start_date,
            end_date,
            until_param,
            sets,
            mut resume,
        } = self.prepare().await?;

        for set in &sets {
            self.harvest_set(set.as_deref(), &mut resume, &start_date, &end_date, &until_param)
                .await?;
        }

        // Finalize: the marker advances to the boundary captured in
        // Prepare, never the wall clock, so the next run starts from a
        // datestamp the server's own clock has already passed.
        match &end_date {
            Some(end) => {
                self.state.save_date(end)?;
                info!(marker = %end, "harvest complete, marker advanced");
            }
            None => info!("harvest complete, no end boundary to record"),
        }
        self.state.clear_state()?;
        self.checkpoint_live = false;
        Ok(())
    }

    async fn prepare(&mut self) -> Result<Plan, HarvestError> {
        let resume = self.detect_resume()?;

        let (start_date, end_date, until_param) = match &resume {
            // An interrupted run already fixed its window; continue with
            // exactly the same bounds and skip marker and Identify lookups.
            Some(cp) => (
                cp.start_date.clone(),
                cp.end_date.clone(),
                cp.end_date.clone(),
            ),
            None => {
                let start = match &self.config.from {
                    Some(from) => Some(from.clone()),
                    None => self.state.load_date()?,
                };
                let end = self.resolve_end_date().await?;
                (start, end, self.config.until.clone())
            }
        };

        Ok(Plan {
            start_date,
            end_date,
            until_param,
            sets: self.config.normalized_sets(),
            resume,
        })
    }

    fn detect_resume(&mut self) -> Result<Option<Checkpoint>, HarvestError> {
        let Some(fields) = self.state.load_state()? else {
            return Ok(None);
        };
        info!("checkpoint found, resuming interrupted harvest");
        match Checkpoint::from_fields(&fields) {
            Some(cp) => {
                self.checkpoint_live = true;
                debug!(set = ?cp.set_spec, token = %cp.token, "restored checkpoint");
                Ok(Some(cp))
            }
            None => {
                self.state.clear_state()?;
                Err(HarvestError::CorruptState)
            }
        }
    }

    /// Resolves the end boundary for a fresh run.
    ///
    /// A caller-supplied `until` is used verbatim; otherwise the
    /// repository clock from `Identify` becomes the boundary, clamped to
    /// day length when the effective granularity is day-level.
    async fn resolve_end_date(&mut self) -> Result<Option<String>, HarvestError> {
        if let Some(until) = self.config.until.clone() {
            // Granularity autodetect still needs one Identify round trip.
            if self.config.granularity == GranularityPolicy::Auto {
                self.identify().await?;
            }
            return Ok(Some(until));
        }

        let info = self.identify().await?;
        let granularity = match self.config.granularity {
            GranularityPolicy::Explicit(g) => g,
            GranularityPolicy::Auto => info.granularity,
        };
        Ok(Some(granularity.clamp(&info.response_date)))
    }

    /// Calls `Identify` once and caches the result for this instance.
    async fn identify(&mut self) -> Result<IdentifyInfo, HarvestError> {
        if let Some(info) = &self.identify {
            return Ok(info.clone());
        }
        let response = self.comm.request(Verb::Identify, &[]).await?;
        let info = match response.body {
            OaiBody::Error { code, message } => {
                return Err(HarvestError::Protocol { code, message });
            }
            OaiBody::Identify { granularity } => IdentifyInfo {
                granularity: granularity
                    .as_deref()
                    .map(Granularity::from_token)
                    .unwrap_or(Granularity::Seconds),
                response_date: response.response_date,
            },
            _ => {
                return Err(HarvestError::Transport(
                    "Identify response carried a different payload".to_string(),
                ));
            }
        };
        debug!(
            granularity = info.granularity.as_token(),
            end_boundary = %info.response_date,
            "identified repository"
        );
        self.identify = Some(info.clone());
        Ok(info)
    }

    /// Pages through `ListRecords` for one set.
    async fn harvest_set(
        &mut self,
        set: Option<&str>,
        resume: &mut Option<Checkpoint>,
        start_date: &Option<String>,
        end_date: &Option<String>,
        until_param: &Option<String>,
    ) -> Result<(), HarvestError> {
        if let Some(cp) = resume {
            if cp.set_spec.as_deref() != set {
                // Fast-forward to the set that was interrupted.
                debug!(
                    set = set.unwrap_or("<all>"),
                    "skipping set completed before interruption"
                );
                return Ok(());
            }
        }

        match set {
            Some(s) => info!(set = s, "harvesting set"),
            None => info!("harvesting all records"),
        }

        let first = match resume.take() {
            // A restored token must be the sole parameter of its request.
            Some(cp) => {
                self.comm
                    .request(Verb::ListRecords, &[("resumptionToken", cp.token.as_str())])
                    .await?
            }
            None => {
                let mut params: Vec<(&str, &str)> =
                    vec![("metadataPrefix", self.config.metadata_prefix.as_str())];
                if let Some(from) = start_date {
                    params.push(("from", from.as_str()));
                }
                if let Some(s) = set {
                    params.push(("set", s));
                }
                if let Some(until) = until_param {
                    params.push(("until", until.as_str()));
                }
                self.comm.request(Verb::ListRecords, &params).await?
            }
        };

        let mut page = 0u64;
        let mut token = self.process_page(first, page)?;
        while let Some(current) = token {
            // The checkpoint must reach stable storage before the next
            // request goes out: a crash from here on resumes with exactly
            // this token.
            self.state.save_state(&Checkpoint {
                set_spec: set.map(String::from),
                token: current.clone(),
                start_date: start_date.clone(),
                end_date: end_date.clone(),
            })?;
            self.checkpoint_live = true;

            page += 1;
            let response = self
                .comm
                .request(Verb::ListRecords, &[("resumptionToken", current.as_str())])
                .await?;
            token = self.process_page(response, page)?;
        }
        Ok(())
    }

    /// Validates one `ListRecords` response, streams its records to the
    /// writer, and returns the continuation token, if any.
    fn process_page(
        &mut self,
        response: OaiResponse,
        page: u64,
    ) -> Result<Option<String>, HarvestError> {
        match response.body {
            OaiBody::Error { code, message } => {
                if code == "badResumptionToken" && self.checkpoint_live {
                    // The saved window is no longer valid; reset so the
                    // operator restarts from the beginning.
                    self.state.clear_state()?;
                    self.checkpoint_live = false;
                    Err(HarvestError::TokenExpired)
                } else {
                    Err(HarvestError::Protocol { code, message })
                }
            }
            OaiBody::ListRecords {
                records,
                resumption_token,
            } => {
                if records.is_empty() {
                    // Empty pages mid-stream are legal; an empty final
                    // page is a clean end for the set.
                    debug!(page, "page carried no records");
                } else {
                    let count = records.len();
                    let latest = self.writer.write(&records)?;
                    info!(page, records = count, "page written");
                    if let Some(latest) = latest {
                        debug!(%latest, "latest record datestamp so far");
                    }
                }
                Ok(resumption_token.filter(|t| !t.is_empty()))
            }
            _ => Err(HarvestError::Transport(
                "ListRecords response carried a different payload".to_string(),
            )),
        }
    }
}
