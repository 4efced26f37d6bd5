//! Project acceptance tests

#![allow(clippy::disallowed_methods)] // Allow unwrap() in tests for clarity

mod common;

use common::{project_block, AccContext};
use tfplug::testing::*;

#[tokio::test]
async fn project_lifecycle() {
    let acc = AccContext::new().await;
    let n = rand_int();

    acc.case()
        .step(
            TestStep::config(Configuration::new().resource(project_block(n))).check(compose(vec![
                check_resource_attr("packet_project.test", "name", format!("test-{}", n)),
                check_resource_attr("packet_project.test", "backend_transfer", "false"),
                check_resource_attr_set("packet_project.test", "organization_id"),
                check_resource_attr_set("packet_project.test", "created"),
            ])),
        )
        .step(
            TestStep::config(
                Configuration::new().resource(
                    project_block(n + 1).attr("backend_transfer", true),
                ),
            )
            .check(compose(vec![
                check_resource_attr("packet_project.test", "name", format!("test-{}", n + 1)),
                check_resource_attr("packet_project.test", "backend_transfer", "true"),
            ])),
        )
        .run()
        .await
        .unwrap();

    if let Some(fake) = &acc.fake {
        assert_eq!(fake.count_requests("POST"), 1);
        assert_eq!(fake.count_requests("PATCH"), 1);
        assert_eq!(fake.count_requests("DELETE"), 1);
    }
}

#[tokio::test]
async fn project_with_backend_transfer_at_creation() {
    let acc = AccContext::new().await;
    let n = rand_int();

    acc.case()
        .step(
            TestStep::config(
                Configuration::new().resource(project_block(n).attr("backend_transfer", true)),
            )
            .check(check_resource_attr(
                "packet_project.test",
                "backend_transfer",
                "true",
            )),
        )
        .run()
        .await
        .unwrap();
}

#[tokio::test]
async fn project_import_basic() {
    let acc = AccContext::new().await;

    acc.case()
        .step(TestStep::config(
            Configuration::new().resource(project_block(rand_int())),
        ))
        .step(TestStep::import(ImportStep::new("packet_project.test")))
        .run()
        .await
        .unwrap();
}
