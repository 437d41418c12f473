// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory tensor driver (`isle.tensor`)
//!
//! The buffer either sits in the driver or has been fetched out; fetch
//! and flush bracket exclusive use the way device-memory views would.
//! `param` preallocates a zeroed tensor, e.g. `f32:640x480` or `u8:16`.

use isle_core::{
    Driver, DriverFlags, DriverSpec, FileId, Flow, Host, Payload, ReqCategory, ReqResult,
    Request, TensorAccess, TensorData, TensorMeta, TensorOp, TensorType,
};

pub fn spec() -> DriverSpec {
    DriverSpec {
        name: "isle.tensor",
        cats: &[ReqCategory::Tensor],
        flags: DriverFlags::default(),
        make: || Box::<TensorDriver>::default(),
    }
}

#[derive(Default)]
pub struct TensorDriver {
    meta: Option<TensorMeta>,
    /// `None` while the buffer is fetched out (or never allocated).
    bytes: Option<Vec<u8>>,
}

/// Parses `<type>:<r1>x<r2>x...` into tensor metadata.
fn parse_param(param: &str) -> Option<TensorMeta> {
    let (ty, reso) = param.split_once(':')?;
    let ty = match ty {
        "u8" => TensorType::U8,
        "u16" => TensorType::U16,
        "f32" => TensorType::F32,
        "f64" => TensorType::F64,
        _ => return None,
    };
    let reso: Option<Vec<u32>> = reso.split('x').map(|r| r.parse().ok()).collect();
    let reso = reso?;
    if reso.is_empty() {
        return None;
    }
    Some(TensorMeta { ty, reso })
}

impl Driver for TensorDriver {
    fn init(&mut self, host: &mut dyn Host, file: FileId) -> bool {
        let param = host.file_get(file).and_then(|info| info.param);
        if let Some(param) = param {
            let Some(meta) = parse_param(&param) else {
                host.msg(&format!("isle.tensor: bad shape param '{param}'\n"));
                return false;
            };
            self.bytes = Some(vec![0; meta.byte_len()]);
            self.meta = Some(meta);
        }
        true
    }

    fn deinit(&mut self, _host: &mut dyn Host, _file: FileId) {}

    fn handle(&mut self, host: &mut dyn Host, _file: FileId, mut req: Request) -> Flow {
        let result = match &mut req.payload {
            Payload::Tensor(op) => self.exec(op),
            _ => {
                req.result = ReqResult::Invalid;
                return Flow::Rejected(req);
            }
        };
        req.finish(host, result);
        Flow::Accepted
    }
}

impl TensorDriver {
    fn exec(&mut self, op: &mut TensorOp) -> ReqResult {
        match op {
            TensorOp::Access { out } => {
                *out = TensorAccess {
                    meta: true,
                    data: true,
                    fetch: true,
                    flush: true,
                };
                ReqResult::Ok
            }
            TensorOp::Meta { out } => match &self.meta {
                Some(meta) => {
                    *out = Some(meta.clone());
                    ReqResult::Ok
                }
                None => ReqResult::Aborted,
            },
            TensorOp::Data { out } => match (&self.meta, &self.bytes) {
                (Some(meta), Some(bytes)) => {
                    *out = Some(TensorData {
                        meta: meta.clone(),
                        bytes: bytes.clone(),
                    });
                    ReqResult::Ok
                }
                _ => ReqResult::Aborted,
            },
            TensorOp::Fetch { out } => match (&self.meta, self.bytes.take()) {
                (Some(meta), Some(bytes)) => {
                    *out = Some(TensorData {
                        meta: meta.clone(),
                        bytes,
                    });
                    ReqResult::Ok
                }
                // Already fetched out, or never allocated.
                _ => ReqResult::Aborted,
            },
            TensorOp::Flush { data } => match data.take() {
                Some(data) => {
                    if data.meta.byte_len() != data.bytes.len() {
                        return ReqResult::Invalid;
                    }
                    self.bytes = Some(data.bytes);
                    self.meta = Some(data.meta);
                    ReqResult::Ok
                }
                None => ReqResult::Invalid,
            },
        }
    }
}

#[cfg(test)]
#[path = "tensor_tests.rs"]
mod tests;
