use super::{Endpoint, RouteMatch, Router};
use http::Method;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Static(String),
    Param(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
            _ => Segment::Static(raw.to_string()),
        }
    }
}

#[derive(Clone)]
struct RouteEntry {
    pattern: String,
    segments: Vec<Segment>,
    handlers: Vec<(Method, Endpoint)>,
}

impl RouteEntry {
    fn param_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count()
    }

    fn capture(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Static(s) if s == part => {}
                Segment::Param(name) if !part.is_empty() => {
                    params.insert(name.clone(), (*part).to_string());
                }
                _ => return None,
            }
        }
        Some(params)
    }

    fn endpoint(&self, method: &Method) -> Option<&Endpoint> {
        let find = |m: &Method| {
            self.handlers
                .iter()
                .find(|(registered, _)| registered == m)
                .map(|(_, ep)| ep)
        };
        find(method).or_else(|| {
            if method == Method::HEAD {
                find(&Method::GET)
            } else {
                None
            }
        })
    }

    fn allowed(&self) -> Vec<Method> {
        let mut allowed: Vec<Method> = self.handlers.iter().map(|(m, _)| m.clone()).collect();
        if allowed.contains(&Method::GET) && !allowed.contains(&Method::HEAD) {
            allowed.push(Method::HEAD);
        }
        allowed
    }
}

fn split(path: &str) -> Vec<&str> {
    path.strip_prefix('/').unwrap_or(path).split('/').collect()
}

/// 线性路由表。
///
/// 路径按 `/` 切分后逐段比较，`{name}` 段捕获任意非空内容。
/// 多条模式同时命中时参数最少的优先；HEAD 请求在未单独注册时使用 GET 的处理器。
#[derive(Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for route in &self.routes {
            let methods: Vec<&str> = route.handlers.iter().map(|(m, _)| m.as_str()).collect();
            list.entry(&format!("{}({})", route.pattern, methods.join(",")));
        }
        list.finish()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册路由，同一模式与方法重复注册时覆盖旧的处理器
    pub fn insert(&mut self, method: Method, pattern: &str, endpoint: Endpoint) {
        let segments: Vec<Segment> = split(pattern).into_iter().map(Segment::parse).collect();
        let entry = match self.routes.iter_mut().position(|r| r.segments == segments) {
            Some(index) => &mut self.routes[index],
            None => {
                self.routes.push(RouteEntry {
                    pattern: pattern.to_string(),
                    segments,
                    handlers: Vec::new(),
                });
                let last = self.routes.len() - 1;
                &mut self.routes[last]
            }
        };
        match entry.handlers.iter_mut().find(|(m, _)| *m == method) {
            Some((_, existing)) => *existing = endpoint,
            None => entry.handlers.push((method, endpoint)),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl Router for RouteTable {
    fn resolve(&self, method: &Method, path: &str) -> RouteMatch {
        let parts = split(path);
        let mut candidates: Vec<(&RouteEntry, HashMap<String, String>)> = self
            .routes
            .iter()
            .filter_map(|route| route.capture(&parts).map(|params| (route, params)))
            .collect();
        if candidates.is_empty() {
            return RouteMatch::NotFound;
        }
        candidates.sort_by_key(|(route, _)| route.param_count());

        let mut allowed = Vec::new();
        for (route, params) in candidates {
            if let Some(endpoint) = route.endpoint(method) {
                return RouteMatch::Found {
                    endpoint: endpoint.clone(),
                    params,
                };
            }
            for m in route.allowed() {
                if !allowed.contains(&m) {
                    allowed.push(m);
                }
            }
        }
        RouteMatch::MethodNotAllowed { allowed }
    }
}
