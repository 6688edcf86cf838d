//! Gateway used when no backend is configured

use async_trait::async_trait;

use super::{Filter, Gateway, GatewayResult, Order, Record, Resource, Subscription};

/// Backend stand-in that accepts every call and stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGateway;

#[async_trait]
impl Gateway for DisabledGateway {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn query(
        &self,
        _resource: Resource,
        _filter: Filter,
        _order: Option<Order>,
    ) -> GatewayResult<Vec<Record>> {
        Ok(Vec::new())
    }

    async fn insert(&self, _resource: Resource, record: Record) -> GatewayResult<Record> {
        Ok(record)
    }

    async fn update(&self, _resource: Resource, _id: &str, patch: Record) -> GatewayResult<Record> {
        Ok(patch)
    }

    async fn delete(&self, _resource: Resource, _filter: Filter) -> GatewayResult<u64> {
        Ok(0)
    }

    async fn subscribe_changes(&self, _resources: &[Resource]) -> GatewayResult<Subscription> {
        Ok(Subscription::idle())
    }
}
