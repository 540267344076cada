use aurora::{Context, Handled, Handler, Server};
use std::str::from_utf8;
use tokio::net::TcpListener;

struct MyHandler;

impl Handler<()> for MyHandler {
    async fn handle(&self, ctx: &mut Context) -> Handled {
        let req = ctx.request();

        let headers = req
            .headers()
            .map(|(name, value)| {
                format!(
                    r#"{:?}: {:?}"#,
                    from_utf8(name).unwrap_or(""),
                    from_utf8(value).unwrap_or(""),
                )
            })
            .collect::<Vec<_>>()
            .join(", ");

        let result = format!(
            r#"{{"method": "{:?}", "path": {:?}, "headers": {{{headers}}}, "body": {:?}}}"#,
            req.method(),
            from_utf8(req.url().path()).unwrap_or(""),
            from_utf8(req.body().unwrap_or(&[])).unwrap_or(""),
        );

        ctx.json(result).unwrap()
    }
}

#[tokio::main]
async fn main() {
    Server::builder()
        .listener(TcpListener::bind("127.0.0.1:8080").await.unwrap())
        .handler(MyHandler)
        .build()
        .launch()
        .await;
}
