//! Route waypoints follow the same rewrite-on-merge rule as account
//! locations, keyed by (route_id, position).

mod common;

use bms_schemas::{Route, RouteWaypoint};

fn waypoint(addr: &str) -> RouteWaypoint {
    RouteWaypoint {
        route_id: 0,
        position: 0,
        name: None,
        address: addr.to_string(),
        suite: None,
        city: None,
        state: None,
        zipcode: None,
        lat: None,
        long: None,
        layover_minutes: Some(15),
        complete_address: Some(format!("{addr}, USA")),
        appt_time: None,
        place_id: None,
    }
}

fn route(id: i64, name: &str, stops: Vec<RouteWaypoint>) -> Route {
    Route {
        id,
        name: name.to_string(),
        route_date: None,
        duration: Some(240),
        start_address: Some("depot".to_string()),
        destination_address: None,
        waypoints: stops,
    }
}

#[tokio::test]
async fn waypoints_are_rewritten_on_remerge() {
    let (_dir, db) = common::test_db().await;

    db.merge_route(&route(3, "Tuesday north loop", vec![waypoint("A"), waypoint("B"), waypoint("C")]))
        .await
        .unwrap();
    assert_eq!(db.list_route_waypoints(3).await.unwrap().len(), 3);

    db.merge_route(&route(3, "Tuesday north loop", vec![waypoint("D")]))
        .await
        .unwrap();

    let rows = db.list_route_waypoints(3).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].str("address"), Some("D"));
    assert_eq!(rows[0].str("complete_address"), Some("D, USA"));

    let found = db.search_routes("%north%").await.unwrap();
    assert_eq!(found.len(), 1);
}
