// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Entity management handlers

use super::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::http::{QueryParams, actor, json, read_json, written};
use dotiam_core::{
    AccessFilter, LMap, LMapPatch, LMapQuery, Pagination, Permission, PermissionPatch, PermissionQuery, Role, RolePatch, RoleQuery, User, UserPatch, UserQuery,
};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Entity collections under `/v1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Users,
    Roles,
    Permissions,
    LMaps,
}

impl Kind {
    pub fn from_segment(segment: &str) -> Option<Self> {
        match segment {
            "users" => Some(Kind::Users),
            "roles" => Some(Kind::Roles),
            "permissions" => Some(Kind::Permissions),
            "lmaps" => Some(Kind::LMaps),
            _ => None,
        }
    }
}

fn not_routed(method: &Method, path: &str) -> ApiError {
    ApiError::NotFound {
        message: format!("Route not found: {} {}", method, path),
    }
}

fn pagination(params: &QueryParams) -> ApiResult<Pagination> {
    Ok(Pagination {
        offset: params.parsed("offset")?.unwrap_or(0),
        limit: params.parsed("limit")?,
    })
}

/// `path`, `method` and `host` parameters select a reverse query
fn access(params: &QueryParams) -> Option<AccessFilter> {
    params.get("path").map(|path| AccessFilter {
        path,
        method: params.get("method"),
        host: params.get("host"),
    })
}

fn user_query(params: &QueryParams) -> ApiResult<UserQuery> {
    Ok(UserQuery {
        id: params.get("id"),
        alias: params.get("alias"),
        search: params.get("search"),
        role_ids: params.all("role_id"),
        disabled: params.parsed("disabled")?,
        service_account: params.parsed("service_account")?,
        local: params.parsed("local")?,
        access: access(params),
        pagination: pagination(params)?,
    })
}

fn role_query(params: &QueryParams) -> ApiResult<RoleQuery> {
    Ok(RoleQuery {
        id: params.get("id"),
        name: params.get("name"),
        search: params.get("search"),
        permission_ids: params.all("permission_id"),
        role_ids: params.all("role_id"),
        access: access(params),
        pagination: pagination(params)?,
    })
}

fn permission_query(params: &QueryParams) -> ApiResult<PermissionQuery> {
    Ok(PermissionQuery {
        id: params.get("id"),
        name: params.get("name"),
        search: params.get("search"),
        access: access(params),
        pagination: pagination(params)?,
    })
}

fn lmap_query(params: &QueryParams) -> ApiResult<LMapQuery> {
    Ok(LMapQuery {
        name: params.get("name"),
        search: params.get("search"),
        role_ids: params.all("role_id"),
        pagination: pagination(params)?,
    })
}

/// GET (list) and POST (create) on `/v1/{kind}`
pub async fn collection(kind: Kind, req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let repo = ctx.service.repository();
    let method = req.method().clone();

    match method {
        Method::GET => {
            let params = QueryParams::parse(req.uri().query());
            match kind {
                Kind::Users => json(StatusCode::OK, &repo.list_users(&user_query(&params)?)?),
                Kind::Roles => json(StatusCode::OK, &repo.list_roles(&role_query(&params)?)?),
                Kind::Permissions => json(StatusCode::OK, &repo.list_permissions(&permission_query(&params)?)?),
                Kind::LMaps => json(StatusCode::OK, &repo.list_lmaps(&lmap_query(&params)?)?),
            }
        }
        Method::POST => {
            let actor = actor(req.headers());
            let (service, cancel, limit) = (&ctx.service, &ctx.cancel, ctx.max_body_size);
            let body = req.into_body();
            match kind {
                Kind::Users => {
                    let user: User = read_json(body, limit).await?;
                    written(StatusCode::CREATED, &service.write(&actor, cancel, |repo, actor| repo.create_user(actor, user)).await?)
                }
                Kind::Roles => {
                    let role: Role = read_json(body, limit).await?;
                    written(StatusCode::CREATED, &service.write(&actor, cancel, |repo, actor| repo.create_role(actor, role)).await?)
                }
                Kind::Permissions => {
                    let permission: Permission = read_json(body, limit).await?;
                    written(StatusCode::CREATED, &service.write(&actor, cancel, |repo, actor| repo.create_permission(actor, permission)).await?)
                }
                Kind::LMaps => {
                    let lmap: LMap = read_json(body, limit).await?;
                    written(StatusCode::CREATED, &service.write(&actor, cancel, |repo, actor| repo.create_lmap(actor, lmap)).await?)
                }
            }
        }
        method => Err(not_routed(&method, req.uri().path())),
    }
}

/// GET, PATCH, PUT and DELETE on `/v1/{kind}/{id}`
pub async fn item(kind: Kind, id: &str, req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let repo = ctx.service.repository();
    let actor = actor(req.headers());
    let (service, cancel, limit) = (&ctx.service, &ctx.cancel, ctx.max_body_size);
    let method = req.method().clone();

    match method {
        Method::GET => match kind {
            Kind::Users => json(StatusCode::OK, &repo.get_user(id)?),
            Kind::Roles => json(StatusCode::OK, &repo.get_role(id)?),
            Kind::Permissions => json(StatusCode::OK, &repo.get_permission(id)?),
            Kind::LMaps => json(StatusCode::OK, &repo.get_lmap(id)?),
        },
        Method::PATCH => {
            let body = req.into_body();
            match kind {
                Kind::Users => {
                    let patch: UserPatch = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.patch_user(actor, id, patch)).await?)
                }
                Kind::Roles => {
                    let patch: RolePatch = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.patch_role(actor, id, patch)).await?)
                }
                Kind::Permissions => {
                    let patch: PermissionPatch = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.patch_permission(actor, id, patch)).await?)
                }
                Kind::LMaps => {
                    let patch: LMapPatch = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.patch_lmap(actor, id, patch)).await?)
                }
            }
        }
        Method::PUT => {
            let body = req.into_body();
            match kind {
                Kind::Users => {
                    let user: User = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.put_user(actor, id, user)).await?)
                }
                Kind::Roles => {
                    let role: Role = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.put_role(actor, id, role)).await?)
                }
                Kind::Permissions => {
                    let permission: Permission = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.put_permission(actor, id, permission)).await?)
                }
                Kind::LMaps => {
                    let lmap: LMap = read_json(body, limit).await?;
                    written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.put_lmap(actor, id, lmap)).await?)
                }
            }
        }
        Method::DELETE => match kind {
            Kind::Users => written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.delete_user(actor, id)).await?),
            Kind::Roles => written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.delete_role(actor, id)).await?),
            Kind::Permissions => written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.delete_permission(actor, id)).await?),
            Kind::LMaps => written(StatusCode::OK, &service.write(&actor, cancel, |repo, actor| repo.delete_lmap(actor, id)).await?),
        },
        method => Err(not_routed(&method, req.uri().path())),
    }
}

/// GET /v1/users/{id}/roles
pub async fn user_roles(id: &str, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    json(StatusCode::OK, &ctx.service.repository().user_effective_roles(id)?)
}

/// GET /v1/users/{id}/permissions
pub async fn user_permissions(id: &str, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    json(StatusCode::OK, &ctx.service.repository().user_permissions(id)?)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RebuildResponse {
    pub entries: usize,
}

/// POST /v1/alias/rebuild
pub async fn rebuild_alias(req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let actor = actor(req.headers());
    let rebuilt = ctx.service.write(&actor, &ctx.cancel, |repo, actor| repo.rebuild_alias_index(actor).map(|entries| RebuildResponse { entries })).await?;
    info!(entries = rebuilt.value.entries, actor = %actor, "Alias index rebuilt on request");
    written(StatusCode::OK, &rebuilt)
}

/// POST /v1/directory/sync, or /v1/directory/sync/{alias} for one user
pub async fn sync_directory(alias: Option<&str>, req: Request<Incoming>, ctx: &RequestContext) -> ApiResult<Response<Full<Bytes>>> {
    let actor = actor(req.headers());
    match alias {
        Some(alias) => written(StatusCode::OK, &ctx.service.sync_directory_user(&actor, alias, &ctx.cancel).await?),
        None => written(StatusCode::OK, &ctx.service.sync_directory(&actor, &ctx.cancel).await?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_segments() {
        assert_eq!(Kind::from_segment("lmaps"), Some(Kind::LMaps));
        assert_eq!(Kind::from_segment("groups"), None);
    }

    #[test]
    fn test_user_query_from_params() {
        let params = QueryParams::parse(Some("search=ada&role_id=r1&role_id=r2&disabled=false&path=/api/x&method=GET&offset=2&limit=10"));
        let query = user_query(&params).unwrap();

        assert_eq!(query.search.as_deref(), Some("ada"));
        assert_eq!(query.role_ids, vec!["r1", "r2"]);
        assert_eq!(query.disabled, Some(false));
        assert_eq!(query.access.unwrap().method.as_deref(), Some("GET"));
        assert_eq!(query.pagination, Pagination { offset: 2, limit: Some(10) });
    }

    #[test]
    fn test_invalid_flag_is_rejected() {
        let params = QueryParams::parse(Some("local=perhaps"));
        assert!(matches!(user_query(&params).unwrap_err(), ApiError::BadRequest { .. }));
    }
}
