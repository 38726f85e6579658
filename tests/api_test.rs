//! HTTP API tests against a live server on a random port.

mod common;

use std::time::Duration;

use common::{jpeg_bytes, TestHarness};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;

fn image_form(formats: &str) -> Form {
    let part = Part::bytes(jpeg_bytes(1600, 900))
        .file_name("holiday.jpg")
        .mime_str("image/jpeg")
        .unwrap();
    Form::new().part("file", part).text("formats", formats.to_string())
}

async fn poll_until_terminal(client: &reqwest::Client, base: &str, id: &str) -> serde_json::Value {
    for _ in 0..300 {
        let job: serde_json::Value = client
            .get(format!("{base}/api/jobs/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job["status"] == "completed" || job["status"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn upload_poll_and_download() {
    let (harness, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/upload"))
        .multipart(
            image_form(r#"{"instagram":["Square"],"twitter":["Post"]}"#)
                .text("output_format", "png")
                .text("lossless", "true"),
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let job: serde_json::Value = response.json().await.unwrap();
    assert_eq!(job["status"], "processing");
    assert_eq!(job["original_file_name"], "holiday.jpg");
    let id = job["id"].as_str().unwrap().to_string();

    let done = poll_until_terminal(&client, &base, &id).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["progress"], 100);
    let results = done["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    for result in results {
        let file_path = result["file_path"].as_str().unwrap();
        assert!(file_path.ends_with(".png"), "{file_path}");

        let response = client
            .get(format!("{base}/api/jobs/{id}/download/{file_path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/png");
        let bytes = response.bytes().await.unwrap();
        assert_eq!(bytes.len() as u64, result["file_size"].as_u64().unwrap());

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.width() as u64, result["dimensions"]["width"].as_u64().unwrap());
        assert_eq!(decoded.height() as u64, result["dimensions"]["height"].as_u64().unwrap());
    }

    let listed: Vec<serde_json::Value> = client
        .get(format!("{base}/api/jobs"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);

    drop(harness);
}

#[tokio::test]
async fn upload_rejections_are_400() {
    let (_harness, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let empty_selection = client
        .post(format!("{base}/api/upload"))
        .multipart(image_form("{}"))
        .send()
        .await
        .unwrap();
    assert_eq!(empty_selection.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = empty_selection.json().await.unwrap();
    assert_eq!(body["code"], "validation_error");

    let not_media = Form::new()
        .part(
            "file",
            Part::bytes(b"hello".to_vec())
                .file_name("notes.txt")
                .mime_str("text/plain")
                .unwrap(),
        )
        .text("formats", r#"{"instagram":["Square"]}"#);
    let response = client
        .post(format!("{base}/api/upload"))
        .multipart(not_media)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let bad_option = client
        .post(format!("{base}/api/upload"))
        .multipart(image_form(r#"{"instagram":["Square"]}"#).text("fit", "stretch"))
        .send()
        .await
        .unwrap();
    assert_eq!(bad_option.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_guards() {
    let (harness, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");
    let client = reqwest::Client::new();

    let input = harness.write_jpeg("photo.jpg", 640, 480);
    let job = harness
        .submit(&input, "image/jpeg", common::work(&[("youtube", &["Thumbnail"])]))
        .await
        .unwrap();
    harness.wait(job.id).await;

    let unlisted = client
        .get(format!("{base}/api/jobs/{}/download/other.jpg", job.id))
        .send()
        .await
        .unwrap();
    assert_eq!(unlisted.status(), StatusCode::NOT_FOUND);

    let nested = client
        .get(format!("{base}/api/jobs/{}/download/a/b.jpg", job.id))
        .send()
        .await
        .unwrap();
    assert_eq!(nested.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_formats() {
    let (_harness, addr) = TestHarness::new().with_server().await;
    let base = format!("http://{addr}");

    let health = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "ok");

    let formats: serde_json::Value = reqwest::get(format!("{base}/api/formats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(formats["youtube"].as_array().unwrap().len() >= 3);
}
