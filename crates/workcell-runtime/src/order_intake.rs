//! [`OrderIntake`] – append-only log of received work orders.

use workcell_types::Order;

#[derive(Debug, Default)]
pub struct OrderIntake {
    orders: Vec<Order>,
}

impl OrderIntake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `order`.  Orders are neither validated nor deduplicated.
    pub fn on_order_received(&mut self, order: Order) {
        self.orders.push(order);
    }

    /// Every order received so far, in arrival order.
    pub fn snapshot(&self) -> Vec<Order> {
        self.orders.clone()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str) -> Order {
        serde_json::from_value(serde_json::json!({ "order_id": id })).unwrap()
    }

    #[test]
    fn preserves_arrival_order_and_duplicates() {
        let mut intake = OrderIntake::new();
        for id in ["order_1", "order_0", "order_1"] {
            intake.on_order_received(order(id));
        }
        let ids: Vec<_> = intake
            .snapshot()
            .into_iter()
            .map(|o| o.order_id.unwrap_or_default())
            .collect();
        assert_eq!(ids, ["order_1", "order_0", "order_1"]);
        assert_eq!(intake.len(), 3);
    }

    #[test]
    fn snapshot_is_detached() {
        let mut intake = OrderIntake::new();
        intake.on_order_received(order("order_0"));
        let before = intake.snapshot();
        intake.on_order_received(order("order_1"));
        assert_eq!(before.len(), 1);
    }
}
