//! The reference refinery: atmospheric distillation (`ad`), a reformer (`rf`)
//! and a catalytic cracker (`cc`) feeding four blend tanks for premium
//! gasoline, regular gasoline, diesel fuel and fuel oil.

use std::collections::{BTreeMap, BTreeSet};

use crate::index::{Horizon, Stream};
use crate::network::{
    BARRELS_TO_CUBIC_METRES, ConversionUnit, Feed, NetworkDescriptor, Product, QualityBound, QualitySpec, Tank,
};
use crate::scenario::{Scenario, TankAblation};

/// Buffer tanks of [`buffered_network`]
pub const BUFFER_TANKS: [&str; 4] = ["srn_tk", "rfg_tk", "ccg_tk", "ccfo_tk"];

const CRUDE_COST: f64 = -33.0;
const FUEL_GAS_CREDIT: f64 = 0.01965;
const REFORMER_FEED_COST: f64 = -2.5;
const CRACKER_FEED_COST: f64 = -2.2;
const PRODUCT_DEMAND: f64 = 10_000.0;

fn st(material: &str, origin: &str, destination: &str) -> Stream {
    Stream::new(material, origin, destination)
}

fn crude() -> Stream {
    st("crude", "crude_source", "ad")
}

/// Four periods of unit length
pub fn reference_horizon() -> Horizon {
    Horizon::unit_periods(4)
}

/// The refinery without buffer tanks
pub fn base_network() -> NetworkDescriptor {
    let mut streams = vec![crude()];
    let mut split_points = BTreeMap::new();

    let splits: [(&str, &str, &[&str]); 7] = [
        ("srg", "ad", &["pg_tk", "rg_tk"]),
        ("srn", "ad", &["rf", "pg_tk", "rg_tk", "df_tk"]),
        ("srds", "ad", &["cc", "df_tk", "fo_tk"]),
        ("srfo", "ad", &["cc", "df_tk", "fo_tk"]),
        ("rfg", "rf", &["pg_tk", "rg_tk"]),
        ("ccg", "cc", &["pg_tk", "rg_tk"]),
        ("ccfo", "cc", &["df_tk", "fo_tk"]),
    ];
    for (material, unit, destinations) in splits {
        let node = format!("{}_sp", material);
        let inbound = st(material, unit, &node);
        let outbound: BTreeSet<Stream> = destinations.iter().map(|d| st(material, &node, d)).collect();
        streams.push(inbound.clone());
        streams.extend(outbound.iter().cloned());
        split_points.insert(inbound, outbound);
    }
    for unit in ["ad", "rf", "cc"] {
        streams.push(st("fg", unit, "fg_sink"));
    }
    let products = products();
    streams.extend(products.iter().map(|p| p.output.clone()));

    let mut costs = BTreeMap::from([
        (crude(), CRUDE_COST),
        (st("srn", "srn_sp", "rf"), REFORMER_FEED_COST),
        (st("srds", "srds_sp", "cc"), CRACKER_FEED_COST),
        (st("srfo", "srfo_sp", "cc"), CRACKER_FEED_COST),
    ]);
    for unit in ["ad", "rf", "cc"] {
        costs.insert(st("fg", unit, "fg_sink"), FUEL_GAS_CREDIT);
    }
    for (product, price) in products.iter().zip([45.36, 43.68, 40.32, 13.14]) {
        costs.insert(product.output.clone(), price);
    }

    NetworkDescriptor {
        streams,
        costs,
        intake_limits: BTreeMap::from([(crude(), 110_000.0)]),
        units: units(),
        split_points,
        products,
        tanks: Vec::new(),
        volume_conversion: BARRELS_TO_CUBIC_METRES,
    }
}

fn units() -> Vec<ConversionUnit> {
    let yields = |unit: &str, table: &[(&str, &str, f64)]| -> BTreeMap<Stream, f64> {
        table
            .iter()
            .map(|(material, destination, coefficient)| (st(material, unit, destination), *coefficient))
            .collect()
    };

    vec![
        ConversionUnit {
            name: "ad".to_string(),
            capacity: 100_000.0,
            feeds: vec![Feed {
                streams: vec![crude()],
                yields: yields(
                    "ad",
                    &[
                        ("fg", "fg_sink", 35.42),
                        ("srg", "srg_sp", 0.270),
                        ("srn", "srn_sp", 0.237),
                        ("srds", "srds_sp", 0.087),
                        ("srfo", "srfo_sp", 0.372),
                    ],
                ),
            }],
        },
        ConversionUnit {
            name: "rf".to_string(),
            capacity: 25_000.0,
            feeds: vec![Feed {
                streams: vec![st("srn", "srn_sp", "rf")],
                yields: yields("rf", &[("fg", "fg_sink", 158.7), ("rfg", "rfg_sp", 0.928)]),
            }],
        },
        ConversionUnit {
            name: "cc".to_string(),
            capacity: 30_000.0,
            feeds: vec![
                Feed {
                    streams: vec![st("srds", "srds_sp", "cc")],
                    yields: yields(
                        "cc",
                        &[("fg", "fg_sink", 336.9), ("ccg", "ccg_sp", 0.619), ("ccfo", "ccfo_sp", 0.189)],
                    ),
                },
                Feed {
                    streams: vec![st("srfo", "srfo_sp", "cc")],
                    yields: yields(
                        "cc",
                        &[("fg", "fg_sink", 386.4), ("ccg", "ccg_sp", 0.688), ("ccfo", "ccfo_sp", 0.2197)],
                    ),
                },
            ],
        },
    ]
}

fn spec(property: &str, bound: QualityBound, threshold: f64, tank: &str, values: &[(&str, f64)]) -> QualitySpec {
    QualitySpec {
        property: property.to_string(),
        bound,
        threshold,
        coefficients: values
            .iter()
            .map(|(material, value)| (st(material, &format!("{}_sp", material), tank), *value))
            .collect(),
    }
}

fn product(name: &str, components: &[&str], specs: Vec<QualitySpec>) -> Product {
    let tank = format!("{}_tk", name);
    Product {
        name: name.to_string(),
        output: st(&format!("{}_prod", name), &tank, &format!("{}_out", name)),
        components: components
            .iter()
            .map(|material| st(material, &format!("{}_sp", material), &tank))
            .collect(),
        demand: Some(PRODUCT_DEMAND),
        specs,
    }
}

fn products() -> Vec<Product> {
    let gasoline = ["srg", "rfg", "srn", "ccg"];
    let gasoline_octane = [("srg", 78.5), ("rfg", 104.0), ("srn", 65.0), ("ccg", 93.7)];
    let gasoline_vapour = [("srg", 18.4), ("rfg", 2.57), ("srn", 6.54), ("ccg", 6.9)];
    let density = [("srn", 272.0), ("ccfo", 294.4), ("srds", 292.0), ("srfo", 295.0)];
    let sulfur = [("srn", 0.283), ("ccfo", 0.353), ("srds", 0.526), ("srfo", 0.980)];

    vec![
        product(
            "pg",
            &gasoline,
            vec![
                spec("octane", QualityBound::Min, 93.0, "pg_tk", &gasoline_octane),
                spec("vapour_pressure", QualityBound::Max, 12.7, "pg_tk", &gasoline_vapour),
            ],
        ),
        product(
            "rg",
            &gasoline,
            vec![
                spec("octane", QualityBound::Min, 83.0, "rg_tk", &gasoline_octane),
                spec("vapour_pressure", QualityBound::Max, 12.7, "rg_tk", &gasoline_vapour),
            ],
        ),
        product(
            "df",
            &["srn", "ccfo", "srds", "srfo"],
            vec![
                spec("density", QualityBound::Max, 306.0, "df_tk", &density),
                spec("sulfur", QualityBound::Max, 0.5, "df_tk", &sulfur),
            ],
        ),
        // Straight-run naphtha is not blended into fuel oil
        product(
            "fo",
            &["ccfo", "srds", "srfo"],
            vec![
                spec("density", QualityBound::Max, 352.0, "fo_tk", &density[1..]),
                spec("sulfur", QualityBound::Max, 3.0, "fo_tk", &sulfur[1..]),
            ],
        ),
    ]
}

/// The refinery with four buffer tanks: `srn_tk` holds reformer feed, the
/// other three hold reformer and cracker product before their split points
pub fn buffered_network() -> NetworkDescriptor {
    let mut network = base_network();

    // Reformer feed buffer between the naphtha split and the reformer
    let srn_in = st("srn", "srn_sp", "srn_tk");
    let srn_out = st("srn", "srn_tk", "rf");
    network.streams.extend([srn_in.clone(), srn_out.clone()]);
    if let Some(outbound) = network.split_points.get_mut(&st("srn", "ad", "srn_sp")) {
        outbound.insert(srn_in.clone());
    }
    if let Some(feed) = network
        .units
        .iter_mut()
        .find(|u| u.name == "rf")
        .and_then(|u| u.feeds.first_mut())
    {
        feed.streams.push(srn_out.clone());
    }
    network.costs.insert(srn_out.clone(), REFORMER_FEED_COST);
    let mut tanks = vec![Tank {
        name: "srn_tk".to_string(),
        radius: 20.0,
        height: 15.0,
        holding_cost: 0.05,
        inbound: vec![srn_in],
        outbound: vec![srn_out],
    }];

    // Product buffers diverting a unit outlet and rejoining at its split point
    for (material, unit, radius, height, holding_cost) in [
        ("rfg", "rf", 15.0, 12.0, 0.06),
        ("ccg", "cc", 15.0, 12.0, 0.06),
        ("ccfo", "cc", 12.0, 10.0, 0.04),
    ] {
        let tank = format!("{}_tk", material);
        let node = format!("{}_sp", material);
        let inbound = st(material, unit, &tank);
        let outbound = st(material, &tank, &node);
        network.streams.extend([inbound.clone(), outbound.clone()]);

        let shared = network
            .split_points
            .get(&st(material, unit, &node))
            .cloned()
            .unwrap_or_default();
        network.split_points.insert(outbound.clone(), shared);

        tanks.push(Tank {
            name: tank,
            radius,
            height,
            holding_cost,
            inbound: vec![inbound],
            outbound: vec![outbound],
        });
    }

    network.tanks = tanks;
    network
}

/// The ten shutdown cases studied on the reference refinery
pub fn shutdown_scenarios() -> Vec<Scenario> {
    let cases: [&[(&str, u32)]; 10] = [
        &[("cc", 3)],
        &[("cc", 2), ("cc", 3)],
        &[("rf", 3)],
        &[("rf", 2), ("rf", 3)],
        &[("rf", 3), ("cc", 1)],
        &[("rf", 3), ("cc", 2)],
        &[("rf", 3), ("cc", 3)],
        &[("rf", 1), ("cc", 4)],
        &[("rf", 2), ("cc", 4)],
        &[("rf", 3), ("cc", 4)],
    ];
    cases
        .iter()
        .zip(1..)
        .map(|(pairs, id)| Scenario::numbered(id, pairs.iter().copied()))
        .collect()
}

/// Take every buffer tank of [`buffered_network`] out of service except `keep`,
/// by closing its inlet
pub fn tank_ablation(keep: &[&str]) -> TankAblation {
    let network = buffered_network();
    TankAblation::new(
        network
            .tanks
            .into_iter()
            .filter(|tank| !keep.contains(&tank.name.as_str()))
            .flat_map(|tank| tank.inbound),
    )
}
