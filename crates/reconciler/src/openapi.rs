//! OpenAPI document synthesis for the service's API gateway.
//!
//! Every function contributes `(path, method)` routes; they are merged into
//! one path item per path. A route may be contributed by a single function,
//! and a path that uses the any-method wildcard may not also declare explicit
//! methods. The output only depends on its inputs, and maps are ordered, so
//! rendering the same input twice gives identical bytes.

use std::collections::{BTreeMap, HashMap};

use itertools::Itertools;
use nimbus_core::ResourceKind;
use serde::Serialize;
use serde_json::Value;

use crate::config::{AuthorizerConfig, HttpEvent, HttpMethod};
use crate::error::{Error, Result};
use crate::resolver::{ReferenceBinder, Resolver};
use crate::resources::GatewaySpec;

pub const OPENAPI_VERSION: &str = "3.0.0";

/// One route contributed by one function.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDeclaration {
    /// Provider-side name of the function serving the route.
    pub function: String,
    /// Service account the gateway invokes the function with.
    pub account: Option<String>,
    pub event: HttpEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenApiDocument {
    pub openapi: &'static str,
    pub info: Info,
    pub paths: BTreeMap<String, PathItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<Components>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Info {
    pub title: String,
    pub version: String,
}

pub type PathItem = BTreeMap<HttpMethod, Operation>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security: Vec<BTreeMap<String, Vec<String>>>,
    #[serde(rename = "x-yc-apigateway-integration")]
    pub integration: Integration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "in")]
    pub location: &'static str,
    pub required: bool,
    pub schema: Schema,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

/// Function invocation attached to an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Integration {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function_id: String,
    pub tag: String,
    pub payload_format_version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Components {
    #[serde(rename = "securitySchemes")]
    pub security_schemes: BTreeMap<String, SecurityScheme>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityScheme {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub scheme: &'static str,
    #[serde(rename = "x-yc-apigateway-authorizer")]
    pub authorizer: FunctionAuthorizer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionAuthorizer {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function_id: String,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorizer_result_ttl_in_seconds: Option<u64>,
}

impl OpenApiDocument {
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if rendering fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization {
            reason: e.to_string(),
        })
    }

    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if rendering fails.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Serialization {
            reason: e.to_string(),
        })
    }
}

/// `{name}` and `{name+}` segments of `path`, as required path parameters.
pub fn path_parameters(path: &str) -> Vec<Parameter> {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('{')?.strip_suffix('}'))
        .map(|name| name.trim_end_matches('+'))
        .filter(|name| !name.is_empty())
        .unique()
        .map(|name| Parameter {
            name: name.to_string(),
            location: "path",
            required: true,
            schema: Schema { kind: "string" },
        })
        .collect()
}

/// Build the gateway document for `spec`, resolving function and account
/// IDs through `resolver`.
///
/// # Errors
///
/// - [`Error::RouteConflict`] if two functions declare the same route
/// - [`Error::AmbiguousRoute`] if a path mixes the wildcard with methods
/// - [`Error::UnknownAuthorizer`] if a route names an unknown authorizer
/// - [`Error::MissingReference`] if a function or account has no ID
pub fn synthesize(
    gateway: &str,
    spec: &GatewaySpec,
    resolver: &dyn Resolver,
    function_tag: &str,
) -> Result<OpenApiDocument> {
    let binder = ReferenceBinder::new(resolver, ResourceKind::ApiGateway, gateway);
    let mut paths: BTreeMap<String, PathItem> = BTreeMap::new();
    let mut owners: HashMap<(&str, HttpMethod), &str> = HashMap::new();
    let mut schemes: BTreeMap<String, SecurityScheme> = BTreeMap::new();

    for route in &spec.routes {
        let path = route.event.path.as_str();
        let method = route.event.method;

        if let Some(&first) = owners.get(&(path, method)) {
            if first == route.function {
                continue;
            }
            return Err(Error::RouteConflict {
                path: path.to_string(),
                method: method.as_str().to_string(),
                first: first.to_string(),
                second: route.function.clone(),
            });
        }

        let mut security = Vec::new();
        if let Some(name) = &route.event.authorizer {
            let authorizer = spec.api.authorizers.get(name).ok_or_else(|| {
                Error::UnknownAuthorizer {
                    function: route.function.clone(),
                    authorizer: name.clone(),
                }
            })?;
            if !schemes.contains_key(name) {
                let scheme = security_scheme(&binder, authorizer, function_tag)?;
                schemes.insert(name.clone(), scheme);
            }
            security.push(BTreeMap::from([(name.clone(), Vec::new())]));
        }

        let integration = Integration {
            kind: "cloud_functions",
            function_id: binder.named(ResourceKind::Function, &route.function)?,
            tag: function_tag.to_string(),
            payload_format_version: spec.api.payload.as_str(),
            service_account_id: binder.optional(
                ResourceKind::ServiceAccount,
                route.account.as_deref(),
                None,
            )?,
            context: route.event.context.clone(),
        };

        owners.insert((path, method), &route.function);
        paths.entry(path.to_string()).or_default().insert(
            method,
            Operation {
                parameters: path_parameters(path),
                security,
                integration,
            },
        );
    }

    if let Some((path, item)) = paths
        .iter()
        .find(|(_, item)| item.contains_key(&HttpMethod::Any) && item.len() > 1)
    {
        return Err(Error::AmbiguousRoute {
            path: path.clone(),
            methods: item.keys().map(|m| m.as_str()).join(", "),
        });
    }

    Ok(OpenApiDocument {
        openapi: OPENAPI_VERSION,
        info: Info {
            title: spec.title.clone(),
            version: spec.version.clone(),
        },
        paths,
        components: (!schemes.is_empty()).then_some(Components {
            security_schemes: schemes,
        }),
    })
}

fn security_scheme(
    binder: &ReferenceBinder<'_>,
    authorizer: &AuthorizerConfig,
    function_tag: &str,
) -> Result<SecurityScheme> {
    Ok(SecurityScheme {
        kind: "http",
        scheme: "bearer",
        authorizer: FunctionAuthorizer {
            kind: "function",
            function_id: binder.named(ResourceKind::Function, &authorizer.function)?,
            tag: function_tag.to_string(),
            service_account_id: binder.optional(
                ResourceKind::ServiceAccount,
                authorizer.account.as_deref(),
                authorizer.account_id.as_deref(),
            )?,
            authorizer_result_ttl_in_seconds: authorizer.result_ttl,
        },
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::BTreeSet;

    use nimbus_provider::FunctionInfo;

    use super::*;
    use crate::config::HttpApiConfig;
    use crate::registry::Registries;

    fn registries(functions: &[(&str, &str)]) -> Registries {
        let mut registries = Registries::default();
        for (name, id) in functions {
            registries.functions.observe(
                *name,
                FunctionInfo {
                    id: (*id).to_string(),
                    name: (*name).to_string(),
                    http_invoke_url: None,
                },
            );
        }
        registries
    }

    fn route(function: &str, method: HttpMethod, path: &str) -> RouteDeclaration {
        RouteDeclaration {
            function: function.to_string(),
            account: None,
            event: HttpEvent {
                method,
                path: path.to_string(),
                authorizer: None,
                context: None,
                account: None,
            },
        }
    }

    fn spec(routes: Vec<RouteDeclaration>) -> GatewaySpec {
        GatewaySpec {
            title: "shop".to_string(),
            version: "1.0.0".to_string(),
            api: HttpApiConfig::default(),
            routes,
        }
    }

    #[test]
    fn test_methods_from_two_functions_merge_into_one_path() {
        let resolver = registries(&[("reader", "fn-r"), ("writer", "fn-w")]);
        let spec = spec(vec![
            route("reader", HttpMethod::Get, "/foo"),
            route("writer", HttpMethod::Post, "/foo"),
        ]);

        let doc = synthesize("shop", &spec, &resolver, "$latest").expect("synthesize");

        let item = doc.paths.get("/foo").expect("path");
        assert_eq!(item.len(), 2);
        assert_eq!(
            item.get(&HttpMethod::Get).map(|op| op.integration.function_id.as_str()),
            Some("fn-r")
        );
        assert_eq!(
            item.get(&HttpMethod::Post).map(|op| op.integration.function_id.as_str()),
            Some("fn-w")
        );
    }

    #[test]
    fn test_any_with_explicit_method_is_ambiguous() {
        let resolver = registries(&[("a", "fn-a"), ("b", "fn-b")]);
        let spec = spec(vec![
            route("a", HttpMethod::Any, "/foo"),
            route("b", HttpMethod::Get, "/foo"),
        ]);

        let err = synthesize("shop", &spec, &resolver, "$latest").expect_err("ambiguous");

        assert_eq!(
            err,
            Error::AmbiguousRoute {
                path: "/foo".to_string(),
                methods: "GET, ANY".to_string(),
            }
        );
    }

    #[test]
    fn test_same_route_from_two_functions_conflicts() {
        let resolver = registries(&[("a", "fn-a"), ("b", "fn-b")]);
        let spec = spec(vec![
            route("a", HttpMethod::Get, "/foo"),
            route("b", HttpMethod::Get, "/foo"),
        ]);

        assert!(matches!(
            synthesize("shop", &spec, &resolver, "$latest"),
            Err(Error::RouteConflict { .. })
        ));
    }

    #[test]
    fn test_same_route_twice_from_one_function_is_idempotent() {
        let resolver = registries(&[("a", "fn-a")]);
        let spec = spec(vec![
            route("a", HttpMethod::Get, "/foo"),
            route("a", HttpMethod::Get, "/foo"),
        ]);

        let doc = synthesize("shop", &spec, &resolver, "$latest").expect("synthesize");
        assert_eq!(doc.paths.get("/foo").map(BTreeMap::len), Some(1));
    }

    #[test]
    fn test_unresolved_function_is_missing_reference() {
        let resolver = registries(&[]);
        let spec = spec(vec![route("ghost", HttpMethod::Get, "/")]);

        assert!(matches!(
            synthesize("shop", &spec, &resolver, "$latest"),
            Err(Error::MissingReference { .. })
        ));
    }

    #[test]
    fn test_path_parameters() {
        let params = path_parameters("/users/{id}/files/{path+}");
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "path"]);
        assert!(params.iter().all(|p| p.required && p.location == "path"));
        assert!(path_parameters("/plain").is_empty());
    }

    #[test]
    fn test_authorizer_rendered_as_security_scheme() {
        let resolver = registries(&[("api", "fn-api"), ("auth", "fn-auth")]);
        let mut api = HttpApiConfig::default();
        api.authorizers.insert(
            "jwt".to_string(),
            AuthorizerConfig {
                function: "auth".to_string(),
                account: None,
                account_id: Some("sa-auth".to_string()),
                result_ttl: Some(300),
            },
        );
        let mut secured = route("api", HttpMethod::Get, "/me");
        secured.event.authorizer = Some("jwt".to_string());
        let spec = GatewaySpec {
            api,
            ..spec(vec![secured])
        };

        let doc = synthesize("shop", &spec, &resolver, "$latest").expect("synthesize");

        let schemes = doc.components.expect("components").security_schemes;
        let scheme = schemes.get("jwt").expect("scheme");
        assert_eq!(scheme.authorizer.function_id, "fn-auth");
        assert_eq!(scheme.authorizer.service_account_id.as_deref(), Some("sa-auth"));
        let op = doc
            .paths
            .get("/me")
            .and_then(|item| item.get(&HttpMethod::Get))
            .expect("operation");
        let required: BTreeSet<&str> = op
            .security
            .iter()
            .flat_map(|req| req.keys().map(String::as_str))
            .collect();
        assert!(required.contains("jwt"));
    }

    #[test]
    fn test_rendered_json_uses_gateway_extensions() {
        let resolver = registries(&[("a", "fn-a")]);
        let spec = spec(vec![route("a", HttpMethod::Any, "/{proxy+}")]);

        let doc = synthesize("shop", &spec, &resolver, "$latest").expect("synthesize");
        let json: Value = serde_json::from_str(&doc.to_json().expect("json")).expect("parse");

        assert_eq!(json["openapi"], "3.0.0");
        let any_method = &json["paths"]["/{proxy+}"]["x-yc-apigateway-any-method"];
        let integration = &any_method["x-yc-apigateway-integration"];
        assert_eq!(integration["type"], "cloud_functions");
        assert_eq!(integration["function_id"], "fn-a");
        assert_eq!(integration["tag"], "$latest");
        assert_eq!(integration["payload_format_version"], "1.0");
    }
}
