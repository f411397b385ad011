//! Management operations on the registry.

use std::collections::BTreeMap;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use waypoint_core::{Registration, RoutingTable, ServiceList};
use waypoint_filters::Rejection;

use crate::params::Params;
use crate::response::{error_response, json_response, status_response};

/// A registry mutation requested by a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Add the instance to its service type.
    Register,
    /// Remove the instance from its service type.
    Deregister,
}

impl Operation {
    /// Applies the operation to an already resolved list and returns the
    /// confirmation message.
    pub fn apply(self, list: &ServiceList, address: &str) -> Result<String, waypoint_core::Error> {
        match self {
            Operation::Register => match list.add_service(address)? {
                Registration::Added => Ok(format!("Registered new {}: {}", list.name(), address)),
                Registration::AlreadyRegistered => {
                    Ok(format!("{}: {} is already registered", list.name(), address))
                }
            },
            Operation::Deregister => {
                list.unregister_service(address);
                Ok(format!("Deregistered {}: {}", list.name(), address))
            }
        }
    }
}

fn precondition_failed(message: impl Into<String>) -> Rejection {
    Rejection::new(StatusCode::PRECONDITION_FAILED, message)
}

/// Validates the parameters, resolves the service type, then runs `operation`.
pub fn manage(
    table: &RoutingTable,
    operation: Operation,
    params: &Params,
) -> Result<Response<Full<Bytes>>, Rejection> {
    let address = params
        .get("address")
        .ok_or_else(|| precondition_failed("Missing address"))?;
    let name = params
        .get("name")
        .ok_or_else(|| precondition_failed("Missing service name"))?;
    let list = table
        .require(name)
        .map_err(|e| precondition_failed(e.to_string()))?;

    let message = operation
        .apply(list, address)
        .map_err(|e| precondition_failed(e.to_string()))?;
    Ok(status_response(StatusCode::OK, &message))
}

/// Every service type's addresses, or one type's when `name` is given.
pub fn list(table: &RoutingTable, params: &Params) -> Result<Response<Full<Bytes>>, Rejection> {
    match params.get("name") {
        None => {
            let all: BTreeMap<&str, Vec<String>> = table
                .services()
                .map(|list| (list.name(), list.addresses_list()))
                .collect();
            Ok(json_response(StatusCode::OK, &all))
        }
        Some(name) => {
            let list = table
                .require(name)
                .map_err(|e| precondition_failed(e.to_string()))?;
            Ok(json_response(StatusCode::OK, &list.addresses_list()))
        }
    }
}

/// The `/error` endpoint.
pub fn redirection_error(params: &Params) -> Response<Full<Bytes>> {
    error_response(params.get("message"))
}
