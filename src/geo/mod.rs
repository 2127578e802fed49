use crate::models::order::{GeoPoint, OrderSnapshot};
use crate::models::step::FlowStep;

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let from_lat = from.lat.to_radians();
    let to_lat = to.lat.to_radians();
    let half_dlat = ((to.lat - from.lat).to_radians() / 2.0).sin();
    let half_dlng = ((to.lng - from.lng).to_radians() / 2.0).sin();

    let h = half_dlat * half_dlat + from_lat.cos() * to_lat.cos() * half_dlng * half_dlng;
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Where the rider is headed at `step`, if the step is a travel leg.
pub fn travel_target(step: FlowStep, order: &OrderSnapshot) -> Option<GeoPoint> {
    match step {
        FlowStep::ReachPickup | FlowStep::ReachReturnLocation => order.pickup_location,
        FlowStep::ReachDelivery => order.customer_location,
        _ => None,
    }
}

pub fn distance_to_target_km(
    step: FlowStep,
    order: &OrderSnapshot,
    position: Option<GeoPoint>,
) -> Option<f64> {
    let target = travel_target(step, order)?;
    Some(haversine_km(&position?, &target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::OrderStatus;

    fn order() -> OrderSnapshot {
        OrderSnapshot {
            order_id: "ord-1".to_string(),
            shop_name: "ABC Restaurant".to_string(),
            pickup_address: "12 MG Road".to_string(),
            pickup_location: Some(GeoPoint {
                lat: 14.6819,
                lng: 77.6006,
            }),
            customer_address: "221B Baker Street".to_string(),
            customer_location: Some(GeoPoint {
                lat: 14.7109,
                lng: 77.6190,
            }),
            items: Vec::new(),
            delivery_amount: 120.0,
            delivery_charge: 20.0,
            delivery_distance: 3.8,
            order_status: OrderStatus::InProgress,
            verifications: Vec::new(),
            return_photo: None,
        }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint {
            lat: 14.6819,
            lng: 77.6006,
        };
        assert!(haversine_km(&p, &p) < 1e-9);
    }

    #[test]
    fn pickup_to_customer_is_a_few_km() {
        let order = order();
        let distance = haversine_km(
            &order.pickup_location.unwrap(),
            &order.customer_location.unwrap(),
        );
        assert!(distance > 3.0 && distance < 4.5, "got {distance}");
    }

    #[test]
    fn target_depends_on_leg() {
        let order = order();
        let at_pickup = order.pickup_location;

        assert_eq!(
            distance_to_target_km(FlowStep::ReachPickup, &order, at_pickup),
            Some(0.0)
        );
        assert!(distance_to_target_km(FlowStep::ReachDelivery, &order, at_pickup).unwrap() > 3.0);
        assert_eq!(distance_to_target_km(FlowStep::Try, &order, at_pickup), None);
        assert_eq!(distance_to_target_km(FlowStep::ReachPickup, &order, None), None);
    }
}
