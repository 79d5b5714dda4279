//! The service's API gateway. Its document is synthesized from scratch on
//! every sync, after every function has an ID.

use async_trait::async_trait;
use nimbus_provider::{ApiGatewayInfo, ApiGatewayRequest};

use crate::config::HttpApiConfig;
use crate::entity::{Entity, Lifecycle, SyncContext, SyncOutcome, Syncable};
use crate::error::Result;
use crate::openapi::{self, RouteDeclaration};

#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySpec {
    pub title: String,
    pub version: String,
    /// Payload format and authorizers. Authorizer functions are provider-side
    /// names.
    pub api: HttpApiConfig,
    pub routes: Vec<RouteDeclaration>,
}

pub type GatewayEntity = Entity<ApiGatewayInfo, GatewaySpec>;

impl GatewayEntity {
    fn request(&self, ctx: &SyncContext<'_>, spec: &GatewaySpec) -> Result<ApiGatewayRequest> {
        let document =
            openapi::synthesize(self.name(), spec, ctx.resolver, &ctx.options.function_tag)?;
        Ok(ApiGatewayRequest {
            name: self.name().to_string(),
            openapi_spec: document.to_json()?,
        })
    }
}

#[async_trait]
impl Syncable for GatewayEntity {
    async fn sync(&self, ctx: &SyncContext<'_>) -> Result<SyncOutcome> {
        match self.lifecycle() {
            Lifecycle::Unmanaged(_) => Ok(super::unmanaged(self)),
            Lifecycle::Create(spec) => {
                let request = self.request(ctx, spec)?;
                let created = ctx
                    .provider
                    .create_api_gateway(&request)
                    .await
                    .map_err(self.provider_failure("create_api_gateway"))?;
                super::created(self, created.id)
            }
            Lifecycle::Update { initial, desired } => {
                let request = self.request(ctx, desired)?;
                ctx.provider
                    .update_api_gateway(&initial.id, &request)
                    .await
                    .map_err(self.provider_failure("update_api_gateway"))?;
                Ok(super::updated(self))
            }
        }
    }
}
