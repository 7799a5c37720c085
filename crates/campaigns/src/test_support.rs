#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    parley_common::now_ms,
    parley_store::{
        Audience, Campaign, CampaignStatus, Contact, ScheduleType, Segment, SqliteStore, Store,
        Template, TemplateStatus, VariableSource, new_id,
    },
    parley_transport::DryRunTransport,
};

use crate::{
    dispatch::{DispatchSettings, Dispatcher},
    reconcile::StatusCallback,
};

pub struct Fixture {
    pub store: Arc<SqliteStore>,
    pub transport: Arc<DryRunTransport>,
    pub dispatcher: Arc<Dispatcher>,
    pub template_id: String,
    pub audience_id: String,
    pub segment_id: String,
    pub contacts: Vec<Contact>,
}

/// An approved template, one segment holding `phones`, and an audience over it.
pub async fn fixture(transport: DryRunTransport, phones: &[&str]) -> Fixture {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let transport = Arc::new(transport);
    let now = now_ms();

    let template = Template {
        id: new_id(),
        name: "welcome".into(),
        content_sid: "HX0001".into(),
        body: "Hi {{1}}, your code is {{2}}".into(),
        status: TemplateStatus::Approved,
        created_at: now,
    };
    store.insert_template(&template).await.unwrap();

    let segment = Segment {
        id: new_id(),
        name: "all".into(),
        created_at: now,
    };
    store.insert_segment(&segment).await.unwrap();

    let mut contacts = Vec::new();
    for (i, phone) in phones.iter().enumerate() {
        let contact = contact(phone, &format!("Customer {i}"));
        store.insert_contact(&contact).await.unwrap();
        store.add_to_segment(&contact.id, &segment.id).await.unwrap();
        contacts.push(contact);
    }

    let audience = Audience {
        id: new_id(),
        name: "everyone".into(),
        segment_ids: vec![segment.id.clone()],
        created_at: now,
    };
    store.insert_audience(&audience).await.unwrap();

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        transport.clone(),
        DispatchSettings {
            batch_size: 2,
            batch_delay: Duration::ZERO,
            status_callback: None,
        },
    ));

    Fixture {
        store,
        transport,
        dispatcher,
        template_id: template.id,
        audience_id: audience.id,
        segment_id: segment.id,
        contacts,
    }
}

/// A provider report without error details.
pub fn callback(provider_message_id: &str, status: &str) -> StatusCallback {
    StatusCallback {
        provider_message_id: provider_message_id.into(),
        status: status.into(),
        error_code: None,
        error_message: None,
    }
}

pub fn contact(phone: &str, name: &str) -> Contact {
    let now = now_ms();
    Contact {
        id: new_id(),
        phone: phone.into(),
        name: Some(name.into()),
        email: None,
        profile: BTreeMap::from([("plan".to_string(), "gold".to_string())]),
        created_at: now,
        updated_at: now,
    }
}

impl Fixture {
    /// Insert a campaign over the fixture audience directly in `status`.
    pub async fn campaign(&self, status: CampaignStatus) -> Campaign {
        let now = now_ms();
        let campaign = Campaign {
            id: new_id(),
            name: "spring promo".into(),
            template_id: self.template_id.clone(),
            audience_id: self.audience_id.clone(),
            segment_ids: vec![self.segment_id.clone()],
            schedule_type: ScheduleType::Immediate,
            scheduled_at: None,
            status,
            variable_source: VariableSource::Static,
            template_variables: BTreeMap::from([
                ("1".to_string(), "friend".to_string()),
                ("2".to_string(), "SPRING".to_string()),
            ]),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.store.insert_campaign(&campaign).await.unwrap();
        campaign
    }

    /// Change the approval state of the fixture template behind the store's back.
    pub async fn set_template_status(&self, status: TemplateStatus) {
        sqlx::query("UPDATE templates SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(&self.template_id)
            .execute(self.store.pool())
            .await
            .unwrap();
    }

    pub async fn status_of(&self, campaign_id: &str) -> CampaignStatus {
        self.store
            .get_campaign(campaign_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }

    /// Poll until the campaign reaches `status`; dispatch runs in the background.
    pub async fn wait_for_status(&self, campaign_id: &str, status: CampaignStatus) {
        for _ in 0..200 {
            if self.status_of(campaign_id).await == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("campaign {campaign_id} never reached {status}");
    }
}
