/// 内置中间件
pub mod middlewares;
