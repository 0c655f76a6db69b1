use super::*;

use serde_json::json;
use shared::domain::Intent;

use crate::{
    gateway::EntityKey,
    test_support::{
        container, containers_json, message, plant, transport_error, RecordingPresenter,
        ScriptedGateway,
    },
};

struct Harness {
    workflow: Arc<PackagingWorkflow>,
    gateway: Arc<ScriptedGateway>,
    presenter: Arc<RecordingPresenter>,
}

fn key(id: &str) -> ContainerKey {
    ContainerKey::new(id, "0001")
}

fn harness() -> Harness {
    let gateway = ScriptedGateway::new();
    let presenter = RecordingPresenter::new();
    let workflow = Arc::new(PackagingWorkflow::new(
        gateway.clone(),
        presenter.clone(),
        WorkflowConfig::default(),
    ));
    Harness {
        workflow,
        gateway,
        presenter,
    }
}

/// Plant P100 assigned to the user and `containers` loaded for it.
async fn loaded(containers: Vec<Container>) -> Harness {
    let h = harness();
    h.gateway.on_read(
        &Resource::Plants,
        Ok(json!({ "results": [{ "Plant": "P100", "Plantname": "Main lab" }] })),
    );
    h.gateway
        .on_read(&Resource::CurrentUserPlant, Ok(json!({ "Uname": "JDOE", "Plant": "P100" })));
    h.gateway
        .on_read(&Resource::Containers, Ok(containers_json(&containers)));
    assert_eq!(h.workflow.load_plants().await.expect("load"), Some(plant()));
    h
}

fn script_create(gateway: &ScriptedGateway, package_id: &str, messages: Vec<serde_json::Value>) {
    gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::CreatePackagingProposal),
        Ok(json!({
            "PackageId": package_id,
            "toPackagingProposalItem": { "results": [] },
            "toPackagingProposalMessagelog": { "results": messages },
        })),
    );
}

async fn created(containers: Vec<Container>, selected: &[&str]) -> Harness {
    let h = loaded(containers).await;
    script_create(&h.gateway, "4711", vec![message("Success", "created")]);
    h.workflow
        .select_containers(selected.iter().map(|id| key(id)))
        .await;
    h.workflow.create_proposal().await.expect("create");
    h
}

#[tokio::test]
async fn load_plants_tolerates_missing_user_plant() {
    let h = harness();
    h.gateway.on_read(
        &Resource::Plants,
        Ok(json!({ "results": [{ "Plant": "P100" }, { "Plant": "P200" }] })),
    );
    h.gateway
        .on_read(&Resource::CurrentUserPlant, Err(transport_error("/PlantUserSet")));

    let assigned = h.workflow.load_plants().await.expect("load");

    assert_eq!(assigned, None);
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.plants.len(), 2);
    assert!(!snapshot.steps.is_valid(WizardStep::PlantAssignment));
    assert_eq!(h.gateway.reads_of(&Resource::Containers), 0);
}

#[tokio::test]
async fn load_plants_fails_when_catalog_fails() {
    let h = harness();
    h.gateway
        .on_read(&Resource::Plants, Err(transport_error("/PlantDetailsSet")));

    assert!(matches!(
        h.workflow.load_plants().await,
        Err(WorkflowError::Gateway {
            action: Action::LoadPlants,
            ..
        })
    ));
}

#[tokio::test]
async fn assigned_plant_loads_containers_and_validates_first_steps() {
    let h = loaded(vec![container("C1", 2, 2), container("C2", 1, 2)]).await;

    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.plant, Some(plant()));
    assert_eq!(snapshot.containers.len(), 2);
    assert!(snapshot.steps.is_valid(WizardStep::PlantAssignment));
    assert!(snapshot.steps.is_valid(WizardStep::ContainerSelection));
    let read = h
        .gateway
        .calls()
        .into_iter()
        .find(|call| call.path == "/ContainerHeaderSet")
        .expect("container read");
    assert_eq!(read.filters, vec![Filter::eq("Plant", "P100")]);
}

#[tokio::test]
async fn assign_plant_posts_without_intent_and_reloads() {
    let h = harness();
    h.gateway.on_create(
        &Resource::PlantUsers,
        None,
        Ok(json!({ "Uname": "JDOE", "Plant": "P200", "Message": "", "Status": "" })),
    );
    h.gateway
        .on_read(&Resource::Containers, Ok(containers_json(&[container("C9", 0, 0)])));

    let assigned = h
        .workflow
        .assign_plant(PlantId::new("P200"))
        .await
        .expect("assign");

    assert_eq!(assigned, PlantId::new("P200"));
    let create = h
        .gateway
        .calls()
        .into_iter()
        .find(|call| call.payload.is_some())
        .expect("create call");
    assert_eq!(create.intent, None);
    assert_eq!(create.payload.expect("payload")["Uname"], "CURRENT_USER");
    assert_eq!(
        h.presenter.toasts(),
        vec!["Plant assigned successfully: P200".to_string()]
    );
    assert_eq!(h.workflow.snapshot().await.containers.len(), 1);

    assert_eq!(
        h.workflow.assign_plant(PlantId::new(" ")).await.unwrap_err().validation(),
        Some(&ValidationError::MissingPlant)
    );
}

#[tokio::test]
async fn account_filter_limits_selection() {
    let h = loaded(vec![
        crate::test_support::container_for_account("C1", "ACME", 1, 1),
        crate::test_support::container_for_account("C2", "Globex", 1, 1),
    ])
    .await;

    h.workflow.select_containers([key("C1")]).await;
    h.workflow.set_account_filter(Some("Globex")).await;
    let flags = h.workflow.select_containers([key("C1"), key("C2")]).await;

    assert_eq!(flags.count, 1);
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.accounts, vec!["ACME".to_string(), "Globex".to_string()]);
    assert_eq!(snapshot.selected, vec![key("C2")]);
}

#[tokio::test]
async fn empty_selection_create_makes_no_call() {
    let h = loaded(vec![container("C1", 2, 2)]).await;
    let calls_before = h.gateway.calls().len();
    let before = h.workflow.snapshot().await;

    let err = h.workflow.create_proposal().await.expect_err("empty");

    assert_eq!(err.validation(), Some(&ValidationError::EmptySelection));
    assert_eq!(h.gateway.calls().len(), calls_before);
    let after = h.workflow.snapshot().await;
    assert_eq!(after.steps, before.steps);
    assert_eq!(after.proposal, before.proposal);
    assert!(!h.workflow.is_busy(Action::CreateProposal));
}

#[tokio::test]
async fn not_ready_selection_is_rejected_before_network() {
    let h = loaded(vec![container("C1", 2, 2), container("C2", 1, 2)]).await;
    h.workflow.select_containers([key("C1"), key("C2")]).await;

    let err = h.workflow.create_proposal().await.expect_err("C2 not ready");

    match err.validation() {
        Some(ValidationError::ContainersNotReady(not_ready)) => {
            assert_eq!(not_ready.len(), 1);
            assert_eq!(not_ready[0].key, key("C2"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h
        .gateway
        .creates_with(Intent::CreatePackagingProposal)
        .is_empty());
}

#[tokio::test]
async fn create_assigns_package_and_advances_after_dismissal() {
    let h = created(vec![container("C1", 2, 2), container("C2", 1, 2)], &["C1"]).await;

    assert_eq!(h.gateway.creates_with(Intent::CreatePackagingProposal).len(), 1);
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.proposal.package_id(), Some(&PackageId::new("4711")));
    assert_eq!(snapshot.proposal.items().len(), 1);
    assert_eq!(snapshot.proposal.items()[0].key(), key("C1"));
    assert_eq!(snapshot.active_step(), WizardStep::Processing);
    assert!(snapshot.steps.is_valid(WizardStep::ProposalCreation));
    assert!(snapshot.selected.is_empty());

    let notice = h.presenter.last_notice().expect("notice");
    assert_eq!(notice.title, CREATE_TITLE);
    assert_eq!(notice.text, "Packaging proposal 4711 created.");
    assert_eq!(h.gateway.reads_of(&Resource::Containers), 2);
}

#[tokio::test]
async fn create_failure_message_suppresses_advance() {
    let h = loaded(vec![container("C1", 2, 2)]).await;
    script_create(&h.gateway, "4711", vec![message("Failure", "Container locked")]);
    assert!(h.workflow.go_to_step(WizardStep::ContainerSelection).await);
    h.workflow.select_containers([key("C1")]).await;

    let err = h.workflow.create_proposal().await.expect_err("failure");

    assert!(matches!(
        err,
        WorkflowError::BusinessFailure {
            action: Action::CreateProposal,
            ..
        }
    ));
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.proposal.package_id(), Some(&PackageId::new("4711")));
    assert_eq!(snapshot.active_step(), WizardStep::ContainerSelection);
    assert!(snapshot.steps.is_valid(WizardStep::ProposalCreation));
    let notice = h.presenter.last_notice().expect("notice");
    assert_eq!(notice.title, CREATE_MESSAGES_TITLE);
    assert_eq!(notice.severity, Severity::Error);
    assert_eq!(notice.text, "Failure: Container locked");

    assert!(h.workflow.go_to_step(WizardStep::ProposalCreation).await);
    assert!(h.workflow.go_to_step(WizardStep::Processing).await);
    assert_eq!(h.workflow.snapshot().await.active_step(), WizardStep::Processing);
}

#[tokio::test]
async fn create_transport_failure_leaves_proposal_untouched() {
    let h = loaded(vec![container("C1", 2, 2)]).await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::CreatePackagingProposal),
        Err(transport_error("/PackagingProposalHeaderSet")),
    );
    assert!(h.workflow.go_to_step(WizardStep::ContainerSelection).await);
    h.workflow.select_containers([key("C1")]).await;

    let err = h.workflow.create_proposal().await.expect_err("transport");

    assert!(matches!(
        err,
        WorkflowError::Gateway {
            action: Action::CreateProposal,
            ..
        }
    ));
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.proposal.package_id(), None);
    assert!(snapshot.proposal.items().is_empty());
    assert!(!snapshot.steps.is_valid(WizardStep::ProposalCreation));
    assert_eq!(snapshot.active_step(), WizardStep::ContainerSelection);
    assert!(!h.workflow.is_busy(Action::CreateProposal));
}

#[tokio::test]
async fn second_create_while_first_in_flight_is_rejected() {
    let h = loaded(vec![container("C1", 2, 2)]).await;
    script_create(&h.gateway, "4711", vec![]);
    h.workflow.select_containers([key("C1")]).await;
    let release = h.gateway.hold(&Resource::ProposalHeaders);

    let first = tokio::spawn({
        let workflow = h.workflow.clone();
        async move { workflow.create_proposal().await }
    });
    while h
        .gateway
        .creates_with(Intent::CreatePackagingProposal)
        .is_empty()
    {
        tokio::task::yield_now().await;
    }

    assert!(matches!(
        h.workflow.create_proposal().await,
        Err(WorkflowError::Busy(Action::CreateProposal))
    ));

    release.notify_one();
    assert_eq!(
        first.await.expect("join").expect("first create"),
        PackageId::new("4711")
    );
    assert_eq!(h.gateway.creates_with(Intent::CreatePackagingProposal).len(), 1);
    assert!(!h.workflow.is_busy(Action::CreateProposal));
}

#[tokio::test]
async fn processing_step_without_package_redirects() {
    let h = loaded(vec![container("C1", 2, 2)]).await;
    h.workflow.go_to_step(WizardStep::ContainerSelection).await;

    assert!(!h.workflow.go_to_step(WizardStep::Processing).await);

    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.active_step(), WizardStep::ContainerSelection);
    assert_eq!(h.presenter.toasts(), vec![CREATE_FIRST.to_string()]);
    assert!(!h.workflow.go_to_index(9).await);
}

#[tokio::test]
async fn process_rejects_dry_ice_above_gross_before_network() {
    let h = created(vec![container("C1", 2, 2)], &["C1"]).await;
    h.workflow.update_form(ProcessField::WeightGross, "10.000").await;
    h.workflow.update_form(ProcessField::WeightDryIce, "15.000").await;
    let calls_before = h.gateway.calls().len();

    let err = h.workflow.process_proposal().await.expect_err("dry ice");

    assert_eq!(err.validation(), Some(&ValidationError::DryIceExceedsGross));
    assert_eq!(h.gateway.calls().len(), calls_before);
}

#[tokio::test]
async fn all_clear_processing_resets_for_next_proposal() {
    let h = created(vec![container("C1", 2, 2)], &["C1"]).await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::ProcessPackagingProposal),
        Ok(json!({ "toPackagingProposalMessagelog": { "results": [message("Success", "done")] } })),
    );
    h.workflow.update_form(ProcessField::WeightGross, "10.000").await;
    h.workflow.update_form(ProcessField::WeightDryIce, "").await;
    let generation = h.workflow.snapshot().await.generation;

    h.workflow.process_proposal().await.expect("process");

    let body = h.gateway.creates_with(Intent::ProcessPackagingProposal)[0]
        .payload
        .clone()
        .expect("payload");
    assert_eq!(body["WeightDryIce"], "0.000");
    let notice = h.presenter.last_notice().expect("notice");
    assert_eq!(notice.title, PROCESS_TITLE);
    assert_eq!(notice.text, "Success: done");

    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.proposal.package_id(), None);
    assert!(snapshot.generation > generation);
    assert_eq!(snapshot.active_step(), WizardStep::ContainerSelection);
    assert_eq!(snapshot.plant, Some(plant()));
    assert_eq!(snapshot.containers.len(), 1);
}

#[tokio::test]
async fn failed_processing_keeps_the_proposal() {
    let h = created(vec![container("C1", 2, 2)], &["C1"]).await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::ProcessPackagingProposal),
        Ok(json!({ "toPackagingProposalMessagelog": [message("FAILURE", "scale offline")] })),
    );
    h.workflow.update_form(ProcessField::WeightGross, "10.000").await;

    let err = h.workflow.process_proposal().await.expect_err("failure");

    assert!(matches!(err, WorkflowError::BusinessFailure { .. }));
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.proposal.package_id(), Some(&PackageId::new("4711")));
    assert_eq!(snapshot.active_step(), WizardStep::Processing);
}

#[tokio::test]
async fn process_transport_failure_suppresses_reset() {
    let h = created(vec![container("C1", 2, 2)], &["C1"]).await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::ProcessPackagingProposal),
        Err(transport_error("/PackagingProposalHeaderSet")),
    );
    h.workflow.update_form(ProcessField::WeightGross, "10.000").await;
    let generation = h.workflow.snapshot().await.generation;

    let err = h.workflow.process_proposal().await.expect_err("transport");

    assert!(matches!(
        err,
        WorkflowError::Gateway {
            action: Action::ProcessProposal,
            ..
        }
    ));
    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.generation, generation);
    assert_eq!(snapshot.proposal.package_id(), Some(&PackageId::new("4711")));
    assert_eq!(snapshot.active_step(), WizardStep::Processing);
    assert!(!h.workflow.is_busy(Action::ProcessProposal));
}

#[tokio::test]
async fn response_after_reset_is_discarded() {
    let h = created(vec![container("C1", 2, 2)], &["C1"]).await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::ProcessPackagingProposal),
        Ok(json!({ "toPackagingProposalMessagelog": [message("Success", "done")] })),
    );
    h.workflow.update_form(ProcessField::WeightGross, "10.000").await;
    let release = h.gateway.hold(&Resource::ProposalHeaders);
    let notices_before = h.presenter.notices().len();

    let pending = tokio::spawn({
        let workflow = h.workflow.clone();
        async move { workflow.process_proposal().await }
    });
    while h
        .gateway
        .creates_with(Intent::ProcessPackagingProposal)
        .is_empty()
    {
        tokio::task::yield_now().await;
    }
    h.workflow.start_new_proposal().await;
    release.notify_one();

    assert!(matches!(
        pending.await.expect("join"),
        Err(WorkflowError::Stale(Action::ProcessProposal))
    ));
    assert_eq!(h.presenter.notices().len(), notices_before);
    assert!(h.workflow.snapshot().await.proposal.messages.is_empty());
}

#[tokio::test]
async fn unassign_refreshes_items_only_on_all_clear() {
    let h = created(
        vec![container("C1", 2, 2), container("C2", 0, 0)],
        &["C1", "C2"],
    )
    .await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::UnassignContainer),
        Ok(json!({ "toPackagingProposalMessagelog": { "results": [message("Success", "ok")] } })),
    );
    h.gateway.on_read(
        &Resource::ProposalItems(EntityKey::package(&PackageId::new("4711"))),
        Ok(json!({ "results": [{ "PackageId": "4711", "ContainerId": "C2", "ConInsId": "0001" }] })),
    );

    let err = h.workflow.unassign_containers().await.expect_err("nothing selected");
    assert_eq!(err.validation(), Some(&ValidationError::EmptyItemSelection));

    assert!(h.workflow.select_proposal_items(&[0]).await);
    h.workflow.unassign_containers().await.expect("unassign");

    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.proposal.items().len(), 1);
    assert_eq!(snapshot.proposal.items()[0].key(), key("C2"));
    assert!(snapshot.proposal.selected_items().is_empty());
    assert_eq!(h.presenter.last_notice().expect("notice").title, UNASSIGN_TITLE);
}

#[tokio::test]
async fn add_containers_with_failure_keeps_items() {
    let h = created(vec![container("C1", 2, 2)], &["C1"]).await;
    h.gateway.on_create(
        &Resource::ProposalHeaders,
        Some(Intent::AddContainer),
        Ok(json!({ "toPackagingProposalMessagelog": [message("Failure", "not eligible")] })),
    );

    let err = h
        .workflow
        .add_containers(vec![key("C5")])
        .await
        .expect_err("failure");

    assert!(matches!(
        err,
        WorkflowError::BusinessFailure {
            action: Action::AddContainers,
            ..
        }
    ));
    let items_path = "/PackagingProposalHeaderSet(PackageId='4711')/toPackagingProposalItem";
    assert!(!h.gateway.calls().iter().any(|call| call.path == items_path));
    assert_eq!(h.workflow.snapshot().await.proposal.items()[0].key(), key("C1"));
}

#[tokio::test]
async fn open_proposal_prefills_and_moves_to_processing() {
    let h = harness();
    let reduced = EntityKey::package(&PackageId::new("4711"));
    h.gateway.on_read(
        &Resource::ProposalHeader(reduced.clone()),
        Ok(json!({
            "PackageId": "4711",
            "Plant": "P100",
            "WeightGross": "25.000",
            "PackageMaterial": "BOX-S",
            "Status": "01"
        })),
    );
    h.gateway.on_read(
        &Resource::ProposalItems(reduced),
        Ok(json!({ "results": [{ "ContainerId": "C1", "ConInsId": "0001" }] })),
    );

    h.workflow
        .open_proposal(PackageId::new("4711"), Some(plant()))
        .await
        .expect("open");

    let snapshot = h.workflow.snapshot().await;
    assert_eq!(snapshot.active_step(), WizardStep::Processing);
    assert_eq!(snapshot.proposal.package_id(), Some(&PackageId::new("4711")));
    assert_eq!(snapshot.proposal.form.weight_gross, "25.000");
    assert_eq!(snapshot.proposal.form.package_material, "BOX-S");
    assert_eq!(snapshot.proposal.items().len(), 1);
}

#[tokio::test]
async fn list_proposals_filters_by_plant() {
    let h = harness();
    h.gateway.on_read(
        &Resource::ProposalHeaders,
        Ok(json!({ "results": [
            { "PackageId": "4711", "Plant": "P100", "Status": "01" },
            { "PackageId": "4712", "Plant": "P100", "Status": "02" },
        ] })),
    );

    let proposals = h.workflow.list_proposals(&plant()).await.expect("list");

    let openable: Vec<bool> = proposals.iter().map(ProposalHeader::can_open).collect();
    assert_eq!(openable, vec![true, false]);
    assert_eq!(
        h.gateway.calls()[0].filters,
        vec![Filter::eq("Plant", "P100")]
    );
}

#[tokio::test]
async fn samples_need_exactly_one_container() {
    let h = loaded(vec![container("C1", 2, 2), container("C2", 0, 0)]).await;

    h.workflow.select_containers([key("C1"), key("C2")]).await;
    assert_eq!(
        h.workflow.open_samples().await.unwrap_err().validation(),
        Some(&ValidationError::SingleContainerRequired)
    );

    h.gateway.on_read(
        &Resource::ContainerSamples(EntityKey::container(&plant(), &key("C1"))),
        Ok(json!({ "results": [{ "SampleId": "S1" }] })),
    );
    h.workflow.select_containers([key("C1")]).await;
    assert_eq!(h.workflow.open_samples().await.expect("open"), 1);
    assert!(h.workflow.samples_dialog().await.is_some());
    h.workflow.close_samples().await;
    assert!(h.workflow.samples_dialog().await.is_none());
}

#[tokio::test]
async fn abandon_selected_reloads_containers() {
    let h = loaded(vec![container("C1", 0, 0), container("C2", 0, 0)]).await;
    h.gateway.on_create(
        &Resource::Containers,
        Some(Intent::AbandonContainer),
        Ok(json!({ "MsgTyp": "Success", "Message": "Abandoned" })),
    );
    h.workflow.select_containers([key("C1"), key("C2")]).await;

    let report = h.workflow.abandon_selected().await.expect("abandon");

    assert_eq!(report.items().len(), 2);
    assert_eq!(h.gateway.reads_of(&Resource::Containers), 2);
    assert!(h.workflow.snapshot().await.selected.is_empty());
    assert_eq!(
        h.presenter.last_notice().expect("notice").text,
        "C1/0001 - Abandoned\nC2/0001 - Abandoned"
    );
}

#[tokio::test]
async fn material_value_help_writes_into_form() {
    let h = harness();
    h.gateway.on_read(
        &Resource::PackagingMaterials,
        Ok(json!({ "results": [
            { "PackageMaterial": "BOX-S", "PackageDesc": "Small insulated box" },
            { "PackageMaterial": "CRATE", "PackageDesc": "Wooden crate" },
        ] })),
    );

    assert_eq!(h.workflow.load_packaging_materials().await.expect("load"), 2);
    let hits = h.workflow.search_materials("insulated").await;
    assert_eq!(hits.len(), 1);

    h.workflow.choose_material(&hits[0].code).await;
    assert_eq!(
        h.workflow.snapshot().await.proposal.form.package_material,
        "BOX-S"
    );
}
