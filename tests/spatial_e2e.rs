use chrono::Utc;

use proxim::item::Category;
use proxim::subscription::DateRange;
use proxim::{Engine, GeoPoint, ItemDraft, ItemStatus, Page, QueryFilters, UserId};

fn seed_ring(engine: &Engine, owner: UserId, center: (f64, f64), count: u32) -> Vec<proxim::Item> {
    // Points on widening circles around the center, a few hundred meters
    // per step.
    (0..count)
        .map(|i| {
            let step = f64::from(i + 1) * 0.003;
            let angle = f64::from(i) * 0.7;
            let lat = center.0 + step * angle.cos();
            let lng = center.1 + step * angle.sin();
            engine
                .create_item(
                    owner,
                    ItemDraft {
                        category: if i % 2 == 0 {
                            Category::Bicycle
                        } else {
                            Category::Phone
                        },
                        serial: None,
                        label: format!("Item {i}"),
                        description: None,
                        location: GeoPoint::new(lat, lng).unwrap(),
                    },
                )
                .unwrap()
        })
        .collect()
}

#[test]
fn results_are_within_radius_and_sorted() {
    let engine = Engine::in_memory();
    let owner = UserId::new();
    let center = GeoPoint::new(48.8566, 2.3522).unwrap();
    seed_ring(&engine, owner, (48.8566, 2.3522), 60);

    let radius = 5_000.0;
    let page = Page {
        offset: 0,
        limit: 500,
    };
    let hits = engine
        .query_nearby(&center, radius, &QueryFilters::default(), page)
        .unwrap();
    assert!(!hits.is_empty());

    let mut last = 0.0f64;
    for hit in &hits {
        assert!(hit.distance_m <= radius, "hit outside radius");
        assert!(hit.distance_m >= last, "distance order violated");
        last = hit.distance_m;

        // The reported distance is the great-circle distance to the item.
        let point = GeoPoint::new(hit.item.lat, hit.item.lng).unwrap();
        assert!((center.distance_m(&point) - hit.distance_m).abs() < 1e-6);
    }
}

#[test]
fn pagination_tiles_the_result_set() {
    let engine = Engine::in_memory();
    let owner = UserId::new();
    let center = GeoPoint::new(48.8566, 2.3522).unwrap();
    seed_ring(&engine, owner, (48.8566, 2.3522), 30);

    let all = engine
        .query_nearby(
            &center,
            50_000.0,
            &QueryFilters::default(),
            Page {
                offset: 0,
                limit: 500,
            },
        )
        .unwrap();
    assert_eq!(all.len(), 30);

    let mut paged = Vec::new();
    let mut offset = 0;
    loop {
        let page = engine
            .query_nearby(
                &center,
                50_000.0,
                &QueryFilters::default(),
                Page { offset, limit: 7 },
            )
            .unwrap();
        if page.is_empty() {
            break;
        }
        offset += page.len();
        paged.extend(page);
    }

    assert_eq!(paged.len(), all.len());
    for (a, b) in all.iter().zip(paged.iter()) {
        assert_eq!(a.item.id, b.item.id);
    }
}

#[test]
fn category_and_status_filters_apply() {
    let engine = Engine::in_memory();
    let owner = UserId::new();
    let center = GeoPoint::new(48.8566, 2.3522).unwrap();
    let items = seed_ring(&engine, owner, (48.8566, 2.3522), 20);

    // Report a couple of the bicycles lost.
    let lost: Vec<_> = items
        .iter()
        .filter(|i| i.category == Category::Bicycle)
        .take(3)
        .collect();
    for item in &lost {
        engine
            .update_item_status(item.id, ItemStatus::Lost, proxim::Actor::User(owner))
            .unwrap();
    }

    let filters = QueryFilters {
        category: Some(Category::Bicycle),
        statuses: Some(vec![ItemStatus::Lost]),
        created: None,
    };
    let hits = engine
        .query_nearby(
            &center,
            50_000.0,
            &filters,
            Page {
                offset: 0,
                limit: 500,
            },
        )
        .unwrap();

    assert_eq!(hits.len(), lost.len());
    for hit in &hits {
        assert_eq!(hit.item.category, Category::Bicycle);
        assert_eq!(hit.item.status, ItemStatus::Lost);
    }
}

#[test]
fn created_date_filter_applies() {
    let engine = Engine::in_memory();
    let owner = UserId::new();
    let center = GeoPoint::new(10.0, 10.0).unwrap();
    seed_ring(&engine, owner, (10.0, 10.0), 5);

    let future_only = DateRange::starting_at(Utc::now() + chrono::Duration::hours(1));
    let filters = QueryFilters {
        category: None,
        statuses: None,
        created: Some(future_only),
    };
    let hits = engine
        .query_nearby(&center, 50_000.0, &filters, Page::first())
        .unwrap();
    assert!(hits.is_empty());

    let covering = DateRange::until(Utc::now() + chrono::Duration::hours(1));
    let filters = QueryFilters {
        category: None,
        statuses: None,
        created: Some(covering),
    };
    let hits = engine
        .query_nearby(&center, 50_000.0, &filters, Page::first())
        .unwrap();
    assert_eq!(hits.len(), 5);
}

#[test]
fn invalid_coordinates_never_enter_the_system() {
    assert!(GeoPoint::new(90.5, 0.0).is_err());
    assert!(GeoPoint::new(0.0, -200.0).is_err());

    // The draft type only accepts an already-validated point, so the
    // engine boundary cannot store an invalid coordinate. The query
    // boundary rejects bad radii.
    let engine = Engine::in_memory();
    let err = engine
        .query_nearby(
            &GeoPoint::new(0.0, 0.0).unwrap(),
            -1.0,
            &QueryFilters::default(),
            Page::first(),
        )
        .unwrap_err();
    assert_eq!(err.code(), "invalid_radius");
}
