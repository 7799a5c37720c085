//! Campaign lifecycle: create, inspect, pause and resume.

use std::{collections::BTreeMap, sync::Arc};

use {
    parley_common::{Entity, Error, Result, codes, now_ms},
    parley_store::{
        Campaign, CampaignAnalytics, CampaignStatus, DispatchRun, ScheduleType, Store,
        TemplateStatus, VariableSource, new_id,
    },
    serde::{Deserialize, Serialize},
    tracing::info,
};

use crate::{analytics::refresh_analytics, dispatch::Dispatcher};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaign {
    pub name: String,
    pub template_id: String,
    pub audience_id: String,
    #[serde(default = "default_schedule")]
    pub schedule_type: ScheduleType,
    /// RFC 3339; required for scheduled campaigns.
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub template_variables: BTreeMap<String, String>,
    #[serde(default = "default_source")]
    pub variable_source: VariableSource,
}

fn default_schedule() -> ScheduleType {
    ScheduleType::Immediate
}

fn default_source() -> VariableSource {
    VariableSource::Static
}

/// Polling view of a campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignView {
    pub campaign: Campaign,
    pub latest_run: Option<DispatchRun>,
    pub analytics: Option<CampaignAnalytics>,
}

pub struct CampaignService {
    store: Arc<dyn Store>,
    dispatcher: Arc<Dispatcher>,
}

impl CampaignService {
    pub fn new(store: Arc<dyn Store>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn create(&self, request: CreateCampaign) -> Result<Campaign> {
        self.create_at(request, now_ms()).await
    }

    /// Validate and store a campaign. Immediate campaigns start dispatching
    /// in the background before this returns.
    pub async fn create_at(&self, request: CreateCampaign, now: i64) -> Result<Campaign> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::validation(
                codes::VALIDATION_ERROR,
                "campaign name is required",
            ));
        }

        let template = self
            .store
            .get_template(&request.template_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Template, &request.template_id))?;
        if template.status != TemplateStatus::Approved {
            return Err(Error::conflict(
                codes::TEMPLATE_NOT_APPROVED,
                format!("template {} is {}, not approved", template.id, template.status),
            ));
        }

        let audience = self
            .store
            .get_audience(&request.audience_id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Audience, &request.audience_id))?;
        if audience.segment_ids.is_empty() {
            return Err(Error::validation(
                codes::EMPTY_AUDIENCE,
                format!("audience {} has no segments", audience.id),
            ));
        }

        let scheduled_at = match request.schedule_type {
            ScheduleType::Immediate => None,
            ScheduleType::Scheduled => Some(parse_schedule(request.scheduled_at.as_deref(), now)?),
        };

        if request.variable_source == VariableSource::Contact
            && request.template_variables.is_empty()
        {
            return Err(Error::validation(
                codes::VALIDATION_ERROR,
                "templateVariables are required when variableSource is contact",
            ));
        }

        let status = match request.schedule_type {
            ScheduleType::Immediate => CampaignStatus::Draft,
            ScheduleType::Scheduled => CampaignStatus::Scheduled,
        };
        let campaign = Campaign {
            id: new_id(),
            name: name.to_string(),
            template_id: template.id,
            audience_id: audience.id,
            segment_ids: audience.segment_ids,
            schedule_type: request.schedule_type,
            scheduled_at,
            status,
            variable_source: request.variable_source,
            template_variables: request.template_variables,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_campaign(&campaign).await?;
        info!(
            campaign_id = %campaign.id,
            schedule = %campaign.schedule_type,
            "campaign created"
        );

        if campaign.schedule_type == ScheduleType::Immediate {
            self.store
                .transition_campaign(
                    &campaign.id,
                    &[CampaignStatus::Draft],
                    CampaignStatus::Running,
                    None,
                    now,
                )
                .await?;
            self.dispatcher.spawn(campaign.id.clone());
        }

        self.load(&campaign.id).await
    }

    pub async fn get(&self, id: &str) -> Result<CampaignView> {
        let campaign = self.load(id).await?;
        Ok(CampaignView {
            latest_run: self.store.latest_run(id).await?,
            analytics: self.store.get_analytics(id).await?,
            campaign,
        })
    }

    /// Stored analytics, computed on first request.
    pub async fn analytics(&self, id: &str) -> Result<CampaignAnalytics> {
        self.load(id).await?;
        match self.store.get_analytics(id).await? {
            Some(analytics) => Ok(analytics),
            None => refresh_analytics(self.store.as_ref(), id, now_ms()).await,
        }
    }

    /// Stop dispatching further batches. The batch in flight completes.
    pub async fn pause(&self, id: &str) -> Result<Campaign> {
        let now = now_ms();
        let paused = self
            .store
            .transition_campaign(
                id,
                &[CampaignStatus::Running, CampaignStatus::Scheduled],
                CampaignStatus::Paused,
                None,
                now,
            )
            .await?;
        let campaign = self.load(id).await?;
        if !paused {
            return Err(state_conflict(&campaign, "pause"));
        }
        info!(campaign_id = id, "campaign paused");
        Ok(campaign)
    }

    /// Continue a paused campaign, skipping recipients that already have a
    /// tracking row. A scheduled campaign whose time has not come goes back
    /// to waiting.
    pub async fn resume(&self, id: &str) -> Result<Campaign> {
        self.resume_at(id, now_ms()).await
    }

    pub async fn resume_at(&self, id: &str, now: i64) -> Result<Campaign> {
        let campaign = self.load(id).await?;
        if campaign.status != CampaignStatus::Paused {
            return Err(state_conflict(&campaign, "resume"));
        }
        let target = match (campaign.schedule_type, campaign.scheduled_at) {
            (ScheduleType::Scheduled, Some(at)) if at > now => CampaignStatus::Scheduled,
            _ => CampaignStatus::Running,
        };
        let resumed = self
            .store
            .transition_campaign(id, &[CampaignStatus::Paused], target, None, now)
            .await?;
        if !resumed {
            let current = self.load(id).await?;
            return Err(state_conflict(&current, "resume"));
        }
        info!(campaign_id = id, status = %target, "campaign resumed");
        if target == CampaignStatus::Running {
            self.dispatcher.spawn(id.to_string());
        }
        self.load(id).await
    }

    async fn load(&self, id: &str) -> Result<Campaign> {
        self.store
            .get_campaign(id)
            .await?
            .ok_or_else(|| Error::not_found(Entity::Campaign, id))
    }
}

fn parse_schedule(raw: Option<&str>, now: i64) -> Result<i64> {
    let raw = raw.ok_or_else(|| {
        Error::validation(
            codes::INVALID_SCHEDULE,
            "scheduledAt is required for scheduled campaigns",
        )
    })?;
    let at = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| {
            Error::validation(
                codes::INVALID_SCHEDULE,
                format!("scheduledAt {raw:?} is not RFC 3339: {e}"),
            )
        })?
        .timestamp_millis();
    if at <= now {
        return Err(Error::validation(
            codes::INVALID_SCHEDULE,
            "scheduledAt must be in the future",
        ));
    }
    Ok(at)
}

fn state_conflict(campaign: &Campaign, action: &str) -> Error {
    Error::conflict(
        codes::CAMPAIGN_STATE,
        format!("cannot {action} campaign {} while {}", campaign.id, campaign.status),
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            scheduler::dispatch_due,
            test_support::{Fixture, fixture},
        },
        parley_store::Template,
        parley_transport::DryRunTransport,
        rstest::rstest,
    };

    const PHONES: [&str; 2] = ["+14155550101", "+14155550102"];

    fn request(fx: &Fixture) -> CreateCampaign {
        CreateCampaign {
            name: "launch".into(),
            template_id: fx.template_id.clone(),
            audience_id: fx.audience_id.clone(),
            schedule_type: ScheduleType::Immediate,
            scheduled_at: None,
            template_variables: BTreeMap::from([("1".to_string(), "there".to_string())]),
            variable_source: VariableSource::Static,
        }
    }

    async fn service() -> (Fixture, CampaignService) {
        let fx = fixture(DryRunTransport::new(), &PHONES).await;
        let service = CampaignService::new(fx.store.clone(), fx.dispatcher.clone());
        (fx, service)
    }

    #[tokio::test]
    async fn immediate_campaign_dispatches_in_background() {
        let (fx, service) = service().await;

        let campaign = service.create(request(&fx)).await.unwrap();
        assert_ne!(campaign.status, CampaignStatus::Draft);
        fx.wait_for_status(&campaign.id, CampaignStatus::Completed)
            .await;

        let view = service.get(&campaign.id).await.unwrap();
        assert_eq!(view.campaign.status, CampaignStatus::Completed);
        assert_eq!(view.latest_run.unwrap().sent, 2);
        assert_eq!(view.analytics.unwrap().sent, 2);
        assert_eq!(fx.transport.sent().await.len(), 2);
    }

    #[tokio::test]
    async fn rejects_unapproved_template() {
        let (fx, service) = service().await;
        let pending = Template {
            id: new_id(),
            name: "draft".into(),
            content_sid: "HX0002".into(),
            body: "Hello".into(),
            status: TemplateStatus::Pending,
            created_at: now_ms(),
        };
        fx.store.insert_template(&pending).await.unwrap();

        let err = service
            .create(CreateCampaign {
                template_id: pending.id,
                ..request(&fx)
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::TEMPLATE_NOT_APPROVED);
    }

    #[tokio::test]
    async fn unknown_references_are_not_found() {
        let (fx, service) = service().await;
        let err = service
            .create(CreateCampaign {
                audience_id: "missing".into(),
                ..request(&fx)
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "AUDIENCE_NOT_FOUND");

        let err = service.analytics("missing").await.unwrap_err();
        assert_eq!(err.code(), "CAMPAIGN_NOT_FOUND");
    }

    #[rstest]
    #[case(None)]
    #[case(Some("next tuesday"))]
    #[case(Some("2001-01-01T00:00:00Z"))]
    #[tokio::test]
    async fn rejects_bad_schedule(#[case] at: Option<&str>) {
        let (fx, service) = service().await;
        let err = service
            .create(CreateCampaign {
                schedule_type: ScheduleType::Scheduled,
                scheduled_at: at.map(str::to_string),
                ..request(&fx)
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::INVALID_SCHEDULE);
    }

    #[tokio::test]
    async fn contact_variables_require_mapping() {
        let (fx, service) = service().await;
        let err = service
            .create(CreateCampaign {
                variable_source: VariableSource::Contact,
                template_variables: BTreeMap::new(),
                ..request(&fx)
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), codes::VALIDATION_ERROR);
    }

    #[tokio::test]
    async fn scheduled_campaign_waits_then_runs() {
        let (fx, service) = service().await;
        let now = now_ms();
        let at = chrono::DateTime::from_timestamp_millis(now + 60_000)
            .unwrap()
            .to_rfc3339();

        let campaign = service
            .create_at(
                CreateCampaign {
                    schedule_type: ScheduleType::Scheduled,
                    scheduled_at: Some(at),
                    ..request(&fx)
                },
                now,
            )
            .await
            .unwrap();
        assert_eq!(campaign.status, CampaignStatus::Scheduled);

        assert_eq!(
            dispatch_due(fx.store.as_ref(), &fx.dispatcher, now).await.unwrap(),
            0
        );
        assert_eq!(
            dispatch_due(fx.store.as_ref(), &fx.dispatcher, now + 61_000)
                .await
                .unwrap(),
            1
        );
        fx.wait_for_status(&campaign.id, CampaignStatus::Completed)
            .await;
    }

    #[tokio::test]
    async fn paused_schedule_resumes_into_waiting() {
        let (fx, service) = service().await;
        let now = now_ms();
        let at = chrono::DateTime::from_timestamp_millis(now + 60_000)
            .unwrap()
            .to_rfc3339();
        let campaign = service
            .create_at(
                CreateCampaign {
                    schedule_type: ScheduleType::Scheduled,
                    scheduled_at: Some(at),
                    ..request(&fx)
                },
                now,
            )
            .await
            .unwrap();

        let paused = service.pause(&campaign.id).await.unwrap();
        assert_eq!(paused.status, CampaignStatus::Paused);
        assert_eq!(
            dispatch_due(fx.store.as_ref(), &fx.dispatcher, now + 61_000)
                .await
                .unwrap(),
            0
        );

        let resumed = service.resume_at(&campaign.id, now).await.unwrap();
        assert_eq!(resumed.status, CampaignStatus::Scheduled);
        assert!(fx.transport.sent().await.is_empty());
    }

    #[tokio::test]
    async fn state_conflicts_on_finished_campaign() {
        let (fx, service) = service().await;
        let campaign = fx.campaign(CampaignStatus::Completed).await;

        assert_eq!(
            service.pause(&campaign.id).await.unwrap_err().code(),
            codes::CAMPAIGN_STATE
        );
        assert_eq!(
            service.resume(&campaign.id).await.unwrap_err().code(),
            codes::CAMPAIGN_STATE
        );
    }

    #[tokio::test]
    async fn analytics_computed_on_first_request() {
        let (fx, service) = service().await;
        let campaign = fx.campaign(CampaignStatus::Paused).await;

        let analytics = service.analytics(&campaign.id).await.unwrap();
        assert_eq!(analytics.total, 0);
        assert_eq!(analytics.delivery_rate, 0.0);
        assert!(fx.store.get_analytics(&campaign.id).await.unwrap().is_some());
    }
}
